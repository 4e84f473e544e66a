use lazy_static::lazy_static;
use log::warn;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;

use crate::{config::AreaType, dates::DateStatus};

pub const CRS_SCHEME: &str = "http://www.opengis.net/def/crs/";

lazy_static! {
    static ref NATIONWIDE: Regex = Regex::new(r"(?i)^.*?landsdekkende$").unwrap();
    static ref AREA_CODE: Regex = Regex::new(r"^.*?(?P<code>\d+)").unwrap();
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    title: Text,
    #[serde(default)]
    updated: Text,
    #[serde(rename = "category", default)]
    categories: Vec<Category>,
}

#[derive(Debug, Default, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "@term", default)]
    term: String,
    #[serde(rename = "@scheme", default)]
    scheme: String,
}

/// What identifies the wanted entry of a dataset feed.
#[derive(Debug, Clone)]
pub struct FeedQuery<'a> {
    pub area_code: &'a str,
    pub area_type: AreaType,
    pub epsg: &'a str,
}

impl Entry {
    fn crs_code(&self) -> Option<&str> {
        self.categories
            .iter()
            .find(|c| c.scheme == CRS_SCHEME)
            .and_then(|c| c.term.rsplit(':').next())
    }

    fn matches(&self, query: &FeedQuery) -> bool {
        if self.crs_code() != Some(query.epsg) {
            return false;
        }
        let title = self.title.value.trim();
        match query.area_type {
            AreaType::Landsdekkende => NATIONWIDE.is_match(title),
            area_type => {
                let area_type = area_type.to_string();
                let hit = self
                    .categories
                    .iter()
                    .any(|c| c.term.to_lowercase() == area_type);
                hit && AREA_CODE
                    .captures(title)
                    .is_some_and(|caps| &caps["code"] == query.area_code)
            }
        }
    }
}

/// Update date of the first feed entry matching `query`.  A feed that does
/// not parse, has no matching entry or a malformed timestamp gives `Unknown`.
pub fn find_update_date(xml: &str, query: &FeedQuery) -> DateStatus {
    let feed: Feed = match from_str(xml) {
        Ok(feed) => feed,
        Err(e) => {
            warn!("Could not parse dataset feed: {}", e);
            return DateStatus::Unknown;
        }
    };
    match feed.entries.iter().find(|entry| entry.matches(query)) {
        Some(entry) => DateStatus::parse_timestamp(&entry.updated.value),
        None => DateStatus::Unknown,
    }
}
