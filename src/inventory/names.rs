//! File name normalization for roms.

use lazy_static::lazy_static;
use regex::Regex;

use crate::catalog::RomTags;

lazy_static! {
    static ref TAG_GROUP: Regex = Regex::new(r"\(([^)]*)\)|\[([^\]]*)\]").expect("valid tag regex");
    static ref REVISION: Regex = Regex::new(r"(?i)^rev(?:ision)?[\s\-]*([0-9a-z.]+)$").expect("valid revision regex");
    static ref SPACES: Regex = Regex::new(r"\s+").expect("valid whitespace regex");
}

// (code, name); both spellings are accepted inside tags.
const REGIONS: &[(&str, &str)] = &[
    ("A", "Australia"),
    ("As", "Asia"),
    ("B", "Brazil"),
    ("C", "Canada"),
    ("Ch", "China"),
    ("E", "Europe"),
    ("F", "France"),
    ("G", "Germany"),
    ("I", "Italy"),
    ("J", "Japan"),
    ("K", "Korea"),
    ("S", "Spain"),
    ("U", "USA"),
    ("UK", "United Kingdom"),
    ("W", "World"),
];

const LANGUAGES: &[(&str, &str)] = &[
    ("Da", "Danish"),
    ("De", "German"),
    ("En", "English"),
    ("Es", "Spanish"),
    ("Fi", "Finnish"),
    ("Fr", "French"),
    ("It", "Italian"),
    ("Ja", "Japanese"),
    ("Ko", "Korean"),
    ("Nl", "Dutch"),
    ("No", "Norwegian"),
    ("Pl", "Polish"),
    ("Pt", "Portuguese"),
    ("Ru", "Russian"),
    ("Sv", "Swedish"),
    ("Zh", "Chinese"),
];

/// Structural attributes derived from a rom's file (or folder) name.
#[derive(Debug, Clone, PartialEq)]
pub struct RomName {
    pub file_name_no_ext: String,
    pub file_extension: String,
    pub file_name_no_tags: String,
    pub tags: RomTags,
}

impl RomName {
    /// Multi-file roms are folders, so their whole name is kept as the base name.
    pub fn parse(file_name: &str, multi: bool) -> Self {
        let (no_ext, ext) = if multi { (file_name.to_string(), String::new()) } else { split_extension(file_name) };
        Self {
            file_name_no_tags: strip_tags(&no_ext),
            tags: parse_tags(&no_ext),
            file_name_no_ext: no_ext,
            file_extension: ext,
        }
    }
}

/// `("Zelda (USA)", "sfc")` for `"Zelda (USA).sfc"`. Leading dots do not start an extension.
pub fn split_extension(file_name: &str) -> (String, String) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < file_name.len() => {
            (file_name[..idx].to_string(), file_name[idx + 1..].to_string())
        }
        _ => (file_name.to_string(), String::new()),
    }
}

pub fn strip_tags(name: &str) -> String {
    let stripped = TAG_GROUP.replace_all(name, " ");
    SPACES.replace_all(stripped.trim(), " ").into_owned()
}

pub fn parse_tags(name: &str) -> RomTags {
    let mut out = RomTags::default();
    for caps in TAG_GROUP.captures_iter(name) {
        let Some(group) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        for part in group.as_str().split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some(region) = lookup(REGIONS, part) {
                push_unique(&mut out.regions, region);
            } else if let Some(language) = lookup(LANGUAGES, part) {
                push_unique(&mut out.languages, language);
            } else if let Some(rev) = REVISION.captures(part).and_then(|c| c.get(1)) {
                out.revision = Some(rev.as_str().to_string());
            } else {
                push_unique(&mut out.tags, part);
            }
        }
    }
    out
}

fn lookup(table: &[(&str, &'static str)], part: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(code, name)| code.eq_ignore_ascii_case(part) || name.eq_ignore_ascii_case(part))
        .map(|(_, name)| *name)
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}
