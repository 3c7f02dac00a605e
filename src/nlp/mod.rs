//! Pattern detection (C7): pure-function enrichment of a normalized query
//! string. Nothing here does I/O; the output is folded into an `Intent`
//! after C8 produces one.
//!
//! Turkish constructs are matched directly against the lowercased, accent-
//! preserved text so name filters keep their original casing for display;
//! a second, ASCII-folded copy is kept alongside for matching the fixed
//! keyword sets where stripping `ı/ğ/ü/ş/ö/ç` makes the regex simpler.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// A detected `name=<value>` filter, e.g. from `ismi ahmet olan`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    pub value: String,
}

/// A detected date predicate, already rendered as a PostgreSQL expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFilter {
    pub predicate: String,
}

/// A hint that the query likely requires a multi-table JOIN, with a short
/// human-readable description the SQL-generation stage can drop into its
/// prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPattern {
    pub tag: &'static str,
    pub description: String,
}

/// Conversational cues: implicit references to prior results, follow-up
/// question shape, and any rewritten/expanded form of the query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationalPattern {
    pub implicit_references: Vec<&'static str>,
    pub follow_up_type: Option<&'static str>,
    pub context_dependent: bool,
    pub expanded_query: Option<String>,
}

/// A detected BI/analytics intent, e.g. `customer_ltv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiPattern {
    pub tag: &'static str,
    pub description: String,
}

/// Everything C7 adds on top of the Intent produced by C8.
#[derive(Debug, Clone, Default)]
pub struct Enrichments {
    pub name_filters: Vec<NameFilter>,
    pub date_filters: Vec<DateFilter>,
    pub join_patterns: Vec<JoinPattern>,
    pub conversational: ConversationalPattern,
    pub bi_patterns: Vec<BiPattern>,
    /// Lowercased, Turkish-agnostic-keyword-replaced form of the input.
    pub normalized: String,
}

const TURKISH_NAMES: &[&str] = &[
    "ahmet", "mehmet", "mustafa", "ali", "huseyin", "hasan", "ibrahim", "ismail", "fatma",
    "ayse", "emine", "hatice", "zeynep", "elif", "merve", "esra", "john", "jane", "admin",
    "test", "demo",
];

fn fold_turkish(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'ı' => 'i',
            'İ' => 'I',
            'ğ' => 'g',
            'Ğ' => 'G',
            'ü' => 'u',
            'Ü' => 'U',
            'ş' => 's',
            'Ş' => 'S',
            'ö' => 'o',
            'Ö' => 'O',
            'ç' => 'c',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}

fn has_turkish_char(word: &str) -> bool {
    word.chars().any(|c| "çğıöşüÇĞİÖŞÜ".contains(c))
}

/// Replaces Turkish aggregate phrases with bracketed SQL-function
/// placeholders, lowercases, folds Turkish characters to ASCII, and
/// collapses whitespace. The original string is kept by the caller for
/// display; this is the matching surface every detector below runs over.
pub fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();

    const AGGREGATE_PHRASES: &[(&str, &str)] = &[
        ("en çok", "[MAX]"),
        ("en az", "[MIN]"),
        ("toplam", "[SUM]"),
        ("ortalama", "[AVG]"),
        ("sayısı", "[COUNT]"),
        ("sayı", "[COUNT]"),
        ("adet", "[COUNT]"),
    ];

    let mut replaced = lower;
    for (phrase, placeholder) in AGGREGATE_PHRASES {
        replaced = replaced.replace(phrase, placeholder);
    }

    let folded = fold_turkish(&replaced);
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

static NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?:ismi|adı)\s+([a-zçğıöşü]+)(?:\s+(?:olan|geçen))?").unwrap(),
        Regex::new(r"([a-zçğıöşü]+)\s+(?:ismi|adı)\s+(?:geçen|olan)").unwrap(),
        Regex::new(r"([a-zçğıöşü]+)\s+(?:isimli|adlı)").unwrap(),
        Regex::new(r"([a-zçğıöşü]+)\s+ismi\s+geçen").unwrap(),
    ]
});

/// Detects `ismi X olan`, `X isimli`, and related Turkish name constructs.
/// Accepts a curated common name, any token containing a Turkish
/// character, or any token of length >= 3.
pub fn detect_name_filters(original_text: &str) -> Vec<NameFilter> {
    let lower = original_text.to_lowercase();
    let mut seen = HashSet::new();
    let mut filters = Vec::new();

    for pattern in NAME_PATTERNS.iter() {
        for captures in pattern.captures_iter(&lower) {
            let Some(m) = captures.get(1) else { continue };
            let name = m.as_str().trim();
            if name.len() < 3 {
                continue;
            }
            if !(TURKISH_NAMES.contains(&name) || has_turkish_char(name) || name.len() >= 3) {
                continue;
            }
            if seen.insert(name.to_string()) {
                filters.push(NameFilter { value: name.to_string() });
            }
        }
    }

    filters
}

struct DatePattern {
    regex: Lazy<Regex>,
    render: fn(&regex::Captures) -> String,
}

macro_rules! date_pattern {
    ($re:expr, $render:expr) => {
        DatePattern { regex: Lazy::new(|| Regex::new($re).unwrap()), render: $render }
    };
}

static DATE_PATTERNS: &[DatePattern] = &[
    date_pattern!(r"son\s+(\d+)\s+gun", |c| format!(
        "created_at >= CURRENT_DATE - INTERVAL '{} days'",
        &c[1]
    )),
    date_pattern!(r"son\s+(\d+)\s+hafta", |c| format!(
        "created_at >= CURRENT_DATE - INTERVAL '{} weeks'",
        &c[1]
    )),
    date_pattern!(r"son\s+(\d+)\s+ay", |c| format!(
        "created_at >= CURRENT_DATE - INTERVAL '{} months'",
        &c[1]
    )),
    date_pattern!(r"son\s+(\d+)\s+yil", |c| format!(
        "created_at >= CURRENT_DATE - INTERVAL '{} years'",
        &c[1]
    )),
    date_pattern!(r"last\s+(\d+)\s+days?", |c| format!(
        "created_at >= CURRENT_DATE - INTERVAL '{} days'",
        &c[1]
    )),
    date_pattern!(r"last\s+(\d+)\s+weeks?", |c| format!(
        "created_at >= CURRENT_DATE - INTERVAL '{} weeks'",
        &c[1]
    )),
    date_pattern!(r"gecen\s+hafta", |_| {
        "created_at >= CURRENT_DATE - INTERVAL '1 week' AND created_at < date_trunc('week', CURRENT_DATE)".to_string()
    }),
    date_pattern!(r"gecen\s+ay", |_| {
        "created_at >= CURRENT_DATE - INTERVAL '1 month' AND created_at < date_trunc('month', CURRENT_DATE)".to_string()
    }),
    date_pattern!(r"bu\s+hafta|this\s+week", |_| "created_at >= date_trunc('week', CURRENT_DATE)".to_string()),
    date_pattern!(r"bu\s+ay|this\s+month", |_| "created_at >= date_trunc('month', CURRENT_DATE)".to_string()),
    date_pattern!(r"bu\s+yil", |_| "created_at >= date_trunc('year', CURRENT_DATE)".to_string()),
    date_pattern!(r"bugun", |_| "DATE(created_at) = CURRENT_DATE".to_string()),
    date_pattern!(r"dun", |_| "DATE(created_at) = CURRENT_DATE - INTERVAL '1 day'".to_string()),
];

/// Detects relative and fixed-period date filters, folded to ASCII first
/// so `gün`/`yıl` match the same patterns as their unaccented forms. Only
/// the first pattern to match wins, mirroring how the SQL builder only
/// ever wants one temporal predicate per query.
pub fn detect_date_filters(normalized_text: &str) -> Option<DateFilter> {
    for pattern in DATE_PATTERNS {
        if let Some(captures) = pattern.regex.captures(normalized_text) {
            return Some(DateFilter { predicate: (pattern.render)(&captures) });
        }
    }
    None
}

static JOIN_PATTERNS: &[(&str, &str, fn(&regex::Captures) -> String)] = &[
    (
        r"en\s+(fazla|cok)\s+(\w+)\s+(yapan|olan|veren)\s+(\w+)",
        "max_aggregation",
        |c| format!("{} with highest {} requires a JOIN", &c[4], &c[2]),
    ),
    (
        r"(\w+)\s+basina\s+(ortalama|toplam)\s+(\w+)",
        "per_group_aggregation",
        |c| format!("{} grouped by {} requires JOIN and GROUP BY", &c[1], &c[3]),
    ),
    (
        r"(\w+)\s+segmentine\s+gore\s+(\w+)",
        "segment_analysis",
        |c| format!("{} by {} segments requires a JOIN", &c[2], &c[1]),
    ),
    (
        r"segment\s+bazinda\s+(\w+)",
        "segment_based",
        |c| format!("{} by customer segments requires a segment JOIN", &c[1]),
    ),
    (
        r"(\w+)\s+performans\s+analizi",
        "performance_analysis",
        |c| format!("{} performance metrics require multiple JOINs", &c[1]),
    ),
    (
        r"gelir\s+kaynagi\s+analizi",
        "revenue_source",
        |_| "revenue source analysis requires multiple table JOINs".to_string(),
    ),
    (
        r"musteri\s+davranis\s+analizi",
        "customer_behavior",
        |_| "customer behavior analysis requires orders/customers JOIN".to_string(),
    ),
    (
        r"segment\w*\s+\[MAX\]\s+gelir",
        "segment_revenue",
        |_| "segment driving highest revenue requires a JOIN between segments and orders, grouped by segment".to_string(),
    ),
];

/// Detects query shapes that need a multi-table JOIN (and usually a
/// GROUP BY), tagging each with the template the SQL-generation stage
/// should reach for.
pub fn detect_join_patterns(normalized_text: &str) -> Vec<JoinPattern> {
    let mut found = Vec::new();
    for (pattern, tag, render) in JOIN_PATTERNS {
        let regex = Regex::new(pattern).expect("static join pattern");
        if let Some(captures) = regex.captures(normalized_text) {
            found.push(JoinPattern { tag, description: render(&captures) });
        }
    }
    found
}

static IMPLICIT_REFERENCE_PATTERNS: &[(&str, &str)] = &[
    (r"\b(bunlar|bunlari|bunlarin|onlar|onlari|onlarin)\b", "previous_results"),
    (r"\b(su|bu)\b(?!\s+(hafta|ay|yil|gun))", "demonstrative_reference"),
    (r"\b(ayni|benzer)\b", "similarity_reference"),
    (r"\b(diger|baska)\b", "alternative_reference"),
];

static FOLLOW_UP_PATTERNS: &[(&str, &str)] = &[
    (r"\b(peki|tamam)\b.*?(ya\s+)?(nasil|ne|kim|nerede)", "follow_up_question"),
    (r"\b(bunun\s+)?(detayi|detaylari|ayrintisi)\b", "detail_request"),
    (r"\b(daha\s+)?(fazla|cok)\s+(bilgi|detay)\b", "more_information"),
    (r"\b(grafigi|tablosu|raporu)\s+(goster|hazirla)\b", "visualization_request"),
    (r"\b(karsilastir|karsilastirma|fark)\b", "comparison_request"),
    (r"\b(neden|sebep|nedeni)\b", "explanation_request"),
    (r"\b(trend|egilim|degisim)\b", "trend_analysis"),
];

/// Detects implicit references and follow-up question shapes. When the
/// query looks like a bare incomplete comparison (`daha fazla` on its
/// own), returns an expansion hint annotating that it needs context.
pub fn detect_conversational_patterns(normalized_text: &str) -> ConversationalPattern {
    let mut out = ConversationalPattern::default();

    for (pattern, ref_type) in IMPLICIT_REFERENCE_PATTERNS {
        let regex = Regex::new(pattern).expect("static conversational pattern");
        if regex.is_match(normalized_text) {
            out.implicit_references.push(ref_type);
            out.context_dependent = true;
        }
    }

    for (pattern, follow_type) in FOLLOW_UP_PATTERNS {
        let regex = Regex::new(pattern).expect("static follow-up pattern");
        if regex.is_match(normalized_text) {
            out.follow_up_type = Some(follow_type);
            break;
        }
    }

    static INCOMPLETE_COMPARISON: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^(daha\s+)?(fazla|cok|az|yuksek|dusuk)$").unwrap());
    if INCOMPLETE_COMPARISON.is_match(normalized_text.trim()) {
        out.expanded_query = Some(format!("{normalized_text} (incomplete comparison, needs context)"));
        out.context_dependent = true;
    }

    out
}

static BI_PATTERNS: &[(&str, &str, &str)] = &[
    (r"musteri\s+(yasam\s+degeri|lifetime\s+value|ltv)", "customer_ltv", "Customer Lifetime Value via cohort analysis"),
    (r"(churn|kayip|terk\s+eden)\s+musteri", "churn_analysis", "Customer churn rate and prediction"),
    (r"musteri\s+(segment|segmentasyon|gruplama)", "customer_segmentation", "RFM analysis and customer segmentation"),
    (r"(retention|elde\s+tutma)\s+(orani|rate)", "retention_rate", "Customer retention rate over time"),
    (r"cohort\s+analiz|kohort\s+analizi", "cohort_analysis", "Cohort analysis for customer behavior"),
    (r"satis\s+(hunisi|funnel|kanali)", "sales_funnel", "Sales funnel conversion rates by stage"),
    (r"(konversiyon|donusum)\s+(orani|rate)", "conversion_rate", "Conversion rate analysis across stages"),
    (r"(mrr|monthly\s+recurring|aylik\s+yinelenen)\s+gelir", "mrr_analysis", "Monthly Recurring Revenue tracking"),
    (r"(arr|annual\s+recurring|yillik\s+yinelenen)\s+gelir", "arr_analysis", "Annual Recurring Revenue analysis"),
    (r"(activation|etkinlestirme)\s+(rate|orani)", "activation_rate", "User activation and onboarding success"),
    (r"(stickiness|yapiskanlik)\s+analiz", "stickiness_analysis", "Product stickiness and retention"),
    (r"(forecast|tahmin|projeksiyon)", "forecasting", "Time series forecasting from historical trends"),
    (r"(growth\s+rate|buyume\s+orani)", "growth_rate", "Growth rate (MoM, YoY, CAGR)"),
    (r"(moving\s+average|hareketli\s+ortalama)", "moving_average", "Moving averages for trend smoothing"),
];

/// Detects business-intelligence intents (LTV, churn, cohort, funnel, ...)
/// so the query builder can reach for a richer analytical template.
pub fn detect_bi_patterns(normalized_text: &str) -> Vec<BiPattern> {
    let mut found = Vec::new();
    for (pattern, tag, description) in BI_PATTERNS {
        let regex = Regex::new(pattern).expect("static bi pattern");
        if regex.is_match(normalized_text) {
            found.push(BiPattern { tag, description: description.to_string() });
        }
    }
    found
}

/// Runs every detector over `original_text` and assembles the full
/// enrichment set handed to the query builder.
pub fn detect(original_text: &str) -> Enrichments {
    let normalized = normalize(original_text);
    Enrichments {
        name_filters: detect_name_filters(original_text),
        date_filters: detect_date_filters(&normalized).into_iter().collect(),
        join_patterns: detect_join_patterns(&normalized),
        conversational: detect_conversational_patterns(&normalized),
        bi_patterns: detect_bi_patterns(&normalized),
        normalized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_replaces_aggregate_phrases_and_folds_chars() {
        let out = normalize("en çok satış yapan müşteri");
        assert!(out.contains("[MAX]"));
        assert!(!out.contains('ç'));
    }

    #[test]
    fn detects_turkish_name_filter() {
        let filters = detect_name_filters("ismi ahmet olan müşterileri listele");
        assert_eq!(filters, vec![NameFilter { value: "ahmet".to_string() }]);
    }

    #[test]
    fn detects_relative_date_filter() {
        let normalized = normalize("son 7 gün içindeki siparişler");
        let filter = detect_date_filters(&normalized).expect("date filter");
        assert!(filter.predicate.contains("INTERVAL '7 days'"));
    }

    #[test]
    fn detects_per_group_join_pattern() {
        let normalized = normalize("müşteri başına ortalama sipariş tutarı");
        let patterns = detect_join_patterns(&normalized);
        assert!(patterns.iter().any(|p| p.tag == "per_group_aggregation"));
    }

    #[test]
    fn detects_comparison_follow_up() {
        let normalized = normalize("öncekiyle karşılaştır");
        let conv = detect_conversational_patterns(&normalized);
        assert_eq!(conv.follow_up_type, Some("comparison_request"));
    }

    #[test]
    fn detects_ltv_bi_pattern() {
        let normalized = normalize("müşteri yaşam değeri analizi");
        let patterns = detect_bi_patterns(&normalized);
        assert!(patterns.iter().any(|p| p.tag == "customer_ltv"));
    }

    #[test]
    fn plain_query_has_no_enrichments() {
        let e = detect("tüm ürünleri listele");
        assert!(e.name_filters.is_empty());
        assert!(e.date_filters.is_empty());
        assert!(e.join_patterns.is_empty());
        assert!(e.bi_patterns.is_empty());
    }
}
