use std::collections::HashSet;

use url::Url;

/// Persistent record of URLs and segment numbers that must not be fetched
/// again for the current source.
///
/// 404s blacklist the URL; failures close to the per-segment timeout
/// blacklist the number, since a different representation's URL for the same
/// segment is likely to hit the same server-side slowness.
#[derive(Debug, Default)]
pub struct Blacklist {
    urls: HashSet<Url>,
    numbers: HashSet<u64>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban_url(&mut self, url: Url) {
        self.urls.insert(url);
    }

    pub fn ban_number(&mut self, number: u64) {
        self.numbers.insert(number);
    }

    pub fn is_banned(&self, url: &Url, number: u64) -> bool {
        self.numbers.contains(&number) || self.urls.contains(url)
    }

    pub fn is_url_banned(&self, url: &Url) -> bool {
        self.urls.contains(url)
    }
}
