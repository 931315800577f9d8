//! Poets and battle topics offered by the input forms.

/// Poets the simulation and battle forms let the user pick.
pub const POETS: &[&str] = &[
    "أحمد شوقي",
    "حافظ ابراهيم",
    "المتنبي",
    "ابن الرومي",
    "ابن الوردي",
    "امرؤ القيس",
    "ابو نواس",
    "خليل مطران",
    "نازك الملائكة",
    "عباس العقاد",
    "الأخطل",
    "نزار قباني",
    "ايليا ابو ماضي",
    "جبران خليل جبران",
];

/// Themes a battle round can be fought on.
pub const TOPICS: &[&str] = &[
    "حزين", "ديني", "ذم", "رثاء", "حب", "غزل", "مدح", "هجاء", "فراق", "وطني",
];

pub fn is_known_poet(name: &str) -> bool {
    POETS.contains(&name.trim())
}

pub fn is_known_topic(topic: &str) -> bool {
    TOPICS.contains(&topic.trim())
}
