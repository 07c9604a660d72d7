//! Canonical OData functions usable in dynamic expressions.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Number of arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    const fn exact(n: usize) -> Self {
        Arity {
            min: n,
            max: Some(n),
        }
    }

    const fn range(min: usize, max: usize) -> Self {
        Arity {
            min,
            max: Some(max),
        }
    }

    const fn at_least(min: usize) -> Self {
        Arity { min, max: None }
    }

    pub fn accepts(self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }

    /// Human-readable form used in diagnostics.
    pub fn describe(self) -> String {
        match self.max {
            Some(max) if max == self.min => self.min.to_string(),
            Some(max) => format!("{} to {}", self.min, max),
            None => format!("at least {}", self.min),
        }
    }
}

static CANONICAL_FUNCTIONS: LazyLock<HashMap<&'static str, Arity>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    // strings and collections
    m.insert("concat", Arity::at_least(2));
    m.insert("contains", Arity::exact(2));
    m.insert("endswith", Arity::exact(2));
    m.insert("startswith", Arity::exact(2));
    m.insert("indexof", Arity::exact(2));
    m.insert("length", Arity::exact(1));
    m.insert("substring", Arity::range(2, 3));
    m.insert("matchesPattern", Arity::exact(2));
    m.insert("tolower", Arity::exact(1));
    m.insert("toupper", Arity::exact(1));
    m.insert("trim", Arity::exact(1));
    m.insert("hassubset", Arity::exact(2));
    m.insert("hassubsequence", Arity::exact(2));
    // date and time
    m.insert("year", Arity::exact(1));
    m.insert("month", Arity::exact(1));
    m.insert("day", Arity::exact(1));
    m.insert("hour", Arity::exact(1));
    m.insert("minute", Arity::exact(1));
    m.insert("second", Arity::exact(1));
    m.insert("fractionalseconds", Arity::exact(1));
    m.insert("date", Arity::exact(1));
    m.insert("time", Arity::exact(1));
    m.insert("totaloffsetminutes", Arity::exact(1));
    m.insert("totalseconds", Arity::exact(1));
    m.insert("now", Arity::exact(0));
    m.insert("maxdatetime", Arity::exact(0));
    m.insert("mindatetime", Arity::exact(0));
    // arithmetic
    m.insert("ceiling", Arity::exact(1));
    m.insert("floor", Arity::exact(1));
    m.insert("round", Arity::exact(1));
    // types
    m.insert("cast", Arity::range(1, 2));
    m.insert("isof", Arity::range(1, 2));
    // geo
    m.insert("geo.distance", Arity::exact(2));
    m.insert("geo.intersects", Arity::exact(2));
    m.insert("geo.length", Arity::exact(1));
    // client-side functions
    m.insert("fillUriTemplate", Arity::at_least(1));
    m.insert("uriEncode", Arity::exact(1));
    m
});

/// Functions from older protocol versions and their replacement.
static LEGACY_FUNCTIONS: &[(&str, &str)] = &[
    ("substringof", "odata.contains"),
    ("gettotaloffsetminutes", "odata.totaloffsetminutes"),
];

const PREFIX: &str = "odata.";

/// Outcome of checking one function application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCheck {
    Canonical,
    WrongArity(Arity),
    Legacy { replacement: &'static str },
    Unknown,
}

/// Qualified name of a function: canonical functions get the `odata.`
/// prefix, anything else is returned unchanged.
pub fn canonical_name(name: &str) -> String {
    let bare = name.strip_prefix(PREFIX).unwrap_or(name);
    let known = CANONICAL_FUNCTIONS.contains_key(bare)
        || LEGACY_FUNCTIONS.iter().any(|(legacy, _)| *legacy == bare);
    if known && !name.starts_with(PREFIX) {
        format!("{PREFIX}{name}")
    } else {
        name.to_string()
    }
}

pub fn check_call(name: &str, count: usize) -> CallCheck {
    let Some(bare) = name.strip_prefix(PREFIX) else {
        return CallCheck::Unknown;
    };
    if let Some((_, replacement)) = LEGACY_FUNCTIONS.iter().find(|(legacy, _)| *legacy == bare) {
        return CallCheck::Legacy { replacement };
    }
    match CANONICAL_FUNCTIONS.get(bare) {
        Some(arity) if arity.accepts(count) => CallCheck::Canonical,
        Some(arity) => CallCheck::WrongArity(*arity),
        None => CallCheck::Unknown,
    }
}
