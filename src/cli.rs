use crate::catalog::{is_known_poet, is_known_topic};
use crate::transcript::{Category, SendRequest};
use clap::Parser;
use std::path::PathBuf;

fn parse_category(s: &str) -> Result<Category, String> {
    s.parse::<Category>().map_err(|e| e.to_string())
}

#[derive(Parser)]
#[command(name = "diwan-chat")]
#[command(version)]
#[command(about = "Arabic poetry chat: verse analysis, poet simulation and poet battles")]
pub struct Args {
    /// Chat mode: 0 = analysis, 1 = simulation, 2 = battle
    #[arg(long, short, default_value = "0", value_parser = parse_category)]
    pub category: Category,

    /// Verse to analyse (analysis) or topic to write about (simulation)
    #[arg(long, short)]
    pub text: Option<String>,

    /// Poet whose style the simulation imitates
    #[arg(long)]
    pub poet: Option<String>,

    /// First poet of a battle
    #[arg(long)]
    pub poet1: Option<String>,

    /// Second poet of a battle
    #[arg(long)]
    pub poet2: Option<String>,

    /// Battle topic, one round per topic (repeatable)
    #[arg(long = "topic")]
    pub topics: Vec<String>,

    /// TOML file with endpoint settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the final transcript as JSON instead of streaming it
    #[arg(long)]
    pub json: bool,

    /// List the known poets and exit
    #[arg(long)]
    pub list_poets: bool,

    /// List the known battle topics and exit
    #[arg(long)]
    pub list_topics: bool,
}

impl Args {
    /// The request the flags describe. Missing fields are left empty so
    /// [`SendRequest::validate`] reports them.
    pub fn to_request(&self) -> SendRequest {
        let text = self.text.clone().unwrap_or_default();
        match self.category {
            Category::Analysis => SendRequest::analysis(text),
            Category::Simulation => SendRequest::simulation(&text, self.poet.as_deref().unwrap_or("")),
            Category::Battle => SendRequest::battle(
                self.poet1.as_deref().unwrap_or(""),
                self.poet2.as_deref().unwrap_or(""),
                self.topics.clone(),
            ),
        }
    }

    /// Poets and topics the request names that the catalogs do not list.
    /// The service may still accept them, so callers only warn.
    pub fn unlisted_choices(&self) -> Vec<String> {
        let poets: Vec<&str> = match self.category {
            Category::Analysis => Vec::new(),
            Category::Simulation => self.poet.as_deref().into_iter().collect(),
            Category::Battle => self.poet1.as_deref().into_iter().chain(self.poet2.as_deref()).collect(),
        };
        let mut unlisted: Vec<String> = poets
            .into_iter()
            .filter(|p| !p.trim().is_empty() && !is_known_poet(p))
            .map(|p| format!("poet '{p}'"))
            .collect();
        if self.category == Category::Battle {
            unlisted.extend(
                self.topics
                    .iter()
                    .filter(|t| !is_known_topic(t))
                    .map(|t| format!("topic '{t}'")),
            );
        }
        unlisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0", Category::Analysis)]
    #[case("1", Category::Simulation)]
    #[case("2", Category::Battle)]
    #[case("battle", Category::Battle)]
    fn test_args_category_values(#[case] raw: &str, #[case] expected: Category) {
        let args = Args::parse_from(["diwan-chat", "--category", raw]);
        assert_eq!(args.category, expected);
    }

    #[test]
    fn test_args_unknown_category_rejected() {
        assert!(Args::try_parse_from(["diwan-chat", "--category", "7"]).is_err());
    }

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::parse_from(["diwan-chat", "--text", "بيت شعر"]);
        assert_eq!(args.category, Category::Analysis);
        assert_eq!(args.text.as_deref(), Some("بيت شعر"));
        assert!(!args.json);
        assert!(args.config.is_none());
        assert!(args.topics.is_empty());
    }

    #[test]
    fn test_args_battle_with_repeated_topics() {
        let args = Args::parse_from([
            "diwan-chat", "-c", "2", "--poet1", "المتنبي", "--poet2", "أحمد شوقي",
            "--topic", "حب", "--topic", "رثاء",
        ]);
        let req = args.to_request();
        assert_eq!(req.category, Category::Battle);
        assert_eq!(req.topics, vec!["حب".to_string(), "رثاء".to_string()]);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_args_simulation_without_poet_fails_validation() {
        let args = Args::parse_from(["diwan-chat", "-c", "1", "--text", "الحب"]);
        assert!(args.to_request().validate().is_err());
    }

    #[test]
    fn test_args_simulation_request() {
        let args = Args::parse_from(["diwan-chat", "-c", "1", "--text", "الحب", "--poet", "المتنبي"]);
        let req = args.to_request();
        assert_eq!(req.poet1.as_deref(), Some("المتنبي"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_unlisted_choices_flags_unknown_poets_and_topics() {
        let args = Args::parse_from([
            "diwan-chat", "-c", "2", "--poet1", "المتنبي", "--poet2", "Shakespeare",
            "--topic", "حب", "--topic", "sci-fi",
        ]);
        assert_eq!(
            args.unlisted_choices(),
            vec!["poet 'Shakespeare'".to_string(), "topic 'sci-fi'".to_string()]
        );
    }

    #[test]
    fn test_unlisted_choices_empty_for_catalog_picks() {
        let sim = Args::parse_from(["diwan-chat", "-c", "1", "--text", "الحب", "--poet", "نزار قباني"]);
        assert!(sim.unlisted_choices().is_empty());
        // Analysis ignores poet flags entirely.
        let analysis = Args::parse_from(["diwan-chat", "--text", "بيت", "--poet", "nobody"]);
        assert!(analysis.unlisted_choices().is_empty());
    }

    #[test]
    fn test_args_list_flags() {
        let args = Args::parse_from(["diwan-chat", "--list-poets", "--list-topics"]);
        assert!(args.list_poets);
        assert!(args.list_topics);
    }

    #[test]
    fn test_args_config_and_json() {
        let args = Args::parse_from(["diwan-chat", "--config", "diwan.toml", "--json"]);
        assert_eq!(args.config, Some(PathBuf::from("diwan.toml")));
        assert!(args.json);
    }
}
