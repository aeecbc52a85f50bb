//! Matching incoming media against pictures already on the product.

use super::Picture;

/// Trailing path segment of a URL, without query or fragment.
pub fn file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// Same source URL: already ingested.
    Exact(usize),
    /// Same file name, different URL: the source moved or changed.
    Renamed(usize),
    None,
}

/// Find the picture that `url` corresponds to, preferring an exact URL match.
pub fn reconcile(pictures: &[Picture], url: &str) -> Match {
    if let Some(idx) = pictures.iter().position(|p| p.primary_url() == Some(url)) {
        return Match::Exact(idx);
    }
    let name = file_name(url);
    if name.is_empty() {
        return Match::None;
    }
    pictures
        .iter()
        .position(|p| p.primary_url().is_some_and(|u| file_name(u) == name))
        .map_or(Match::None, Match::Renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Picture;

    fn pictures(urls: &[&str]) -> Vec<Picture> {
        urls.iter().map(|u| Picture::fallback(u, "alt")).collect()
    }

    #[test]
    fn file_name_strips_query_and_fragment() {
        assert_eq!(file_name("https://x/a/b/img1.jpg?v=2#top"), "img1.jpg");
        assert_eq!(file_name("https://x/"), "");
    }

    #[test]
    fn exact_url_wins_over_file_name() {
        let pics = pictures(&["https://old/img1.jpg", "https://x/img1.jpg"]);
        assert_eq!(reconcile(&pics, "https://x/img1.jpg"), Match::Exact(1));
    }

    #[test]
    fn same_file_name_on_other_host_is_renamed() {
        let pics = pictures(&["https://cdn/a.jpg", "https://old/img1.jpg"]);
        assert_eq!(reconcile(&pics, "https://new/img1.jpg"), Match::Renamed(1));
    }

    #[test]
    fn partial_file_name_does_not_match() {
        let pics = pictures(&["https://x/big-img1.jpg"]);
        assert_eq!(reconcile(&pics, "https://x/img1.jpg"), Match::None);
    }

    #[test]
    fn empty_product_never_matches() {
        assert_eq!(reconcile(&[], "https://x/img1.jpg"), Match::None);
    }
}
