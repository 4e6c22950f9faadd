use std::ops::{Range, RangeInclusive};

use regex::Regex;
use url::Url;

use crate::error::AcquireError;

pub const DEFAULT_PAGE_MARKER: &str = "/page/";

/// Positional page-number pattern: a fixed marker followed by digits that end at
/// a path, query or fragment boundary (e.g. `/page/<n>`).
#[derive(Debug, Clone)]
pub struct PagePattern {
    marker: String,
    regex: Regex,
}

impl PagePattern {
    pub fn new(marker: &str) -> anyhow::Result<Self> {
        if marker.trim().is_empty() {
            anyhow::bail!("page marker must not be empty");
        }
        let regex = Regex::new(&format!(r"{}(\d+)", regex::escape(marker)))
            .map_err(|err| anyhow::anyhow!("compile page marker {marker:?}: {err}"))?;
        Ok(Self {
            marker: marker.to_owned(),
            regex,
        })
    }

    pub fn extract_page_index(&self, url: &Url) -> Result<u32, AcquireError> {
        let span = self.digits_span(url.as_str())?;
        url.as_str()[span]
            .parse::<u32>()
            .map_err(|err| AcquireError::malformed(url.as_str(), format!("page index: {err}")))
    }

    pub fn build_page_url(&self, template: &Url, page_index: u32) -> Result<Url, AcquireError> {
        let raw = template.as_str();
        let span = self.digits_span(raw)?;
        let digits = &raw[span.clone()];
        let width = if digits.len() > 1 && digits.starts_with('0') {
            digits.len()
        } else {
            0
        };

        let mut out = String::with_capacity(raw.len() + 4);
        out.push_str(&raw[..span.start]);
        out.push_str(&format!("{page_index:0width$}"));
        out.push_str(&raw[span.end..]);

        Url::parse(&out).map_err(|err| AcquireError::malformed(out.clone(), err.to_string()))
    }

    fn digits_span(&self, raw: &str) -> Result<Range<usize>, AcquireError> {
        let mut spans = self.regex.captures_iter(raw).filter_map(|caps| {
            let digits = caps.get(1)?;
            let boundary_ok = raw[digits.end()..]
                .chars()
                .next()
                .is_none_or(|ch| matches!(ch, '/' | '?' | '#'));
            boundary_ok.then(|| digits.range())
        });

        let Some(first) = spans.next() else {
            return Err(AcquireError::malformed(
                raw,
                format!("page marker `{}<n>` not found", self.marker),
            ));
        };
        if spans.next().is_some() {
            return Err(AcquireError::malformed(
                raw,
                format!("page marker `{}<n>` occurs more than once", self.marker),
            ));
        }
        Ok(first)
    }
}

/// Contiguous page range addressed through one template URL.
#[derive(Debug, Clone)]
pub struct PageRange {
    pub first: u32,
    pub last: u32,
    template: Url,
}

impl PageRange {
    pub fn from_urls(
        first_page_url: &Url,
        last_page_url: &Url,
        pattern: &PagePattern,
    ) -> Result<Self, AcquireError> {
        let first = pattern.extract_page_index(first_page_url)?;
        let last = pattern.extract_page_index(last_page_url)?;
        if first > last {
            return Err(AcquireError::InvalidRange { first, last });
        }
        Ok(Self {
            first,
            last,
            template: first_page_url.clone(),
        })
    }

    pub fn indices(&self) -> RangeInclusive<u32> {
        self.first..=self.last
    }

    pub fn page_count(&self) -> usize {
        (self.last - self.first) as usize + 1
    }

    pub fn template(&self) -> &Url {
        &self.template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_pattern() -> PagePattern {
        PagePattern::new(DEFAULT_PAGE_MARKER).unwrap()
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn extract_and_build_round_trip() {
        let pattern = default_pattern();
        for raw in [
            "https://flyers.example.com/catalog/view/flyer/page/1",
            "https://flyers.example.com/catalog/view/flyer/page/17/",
            "https://flyers.example.com/catalog/page/3?lang=ro#top",
            "https://flyers.example.com/catalog/page/007",
        ] {
            let u = url(raw);
            let index = pattern.extract_page_index(&u).unwrap();
            assert_eq!(pattern.build_page_url(&u, index).unwrap(), u, "{raw}");
        }
    }

    #[test]
    fn build_substitutes_only_the_page_segment() {
        let pattern = default_pattern();
        let template = url("https://flyers.example.com/l/perioada-01-02/view/flyer/page/1?x=1");
        let built = pattern.build_page_url(&template, 12).unwrap();
        assert_eq!(
            built.as_str(),
            "https://flyers.example.com/l/perioada-01-02/view/flyer/page/12?x=1"
        );
    }

    #[test]
    fn build_keeps_zero_padding_width() {
        let pattern = default_pattern();
        let template = url("https://flyers.example.com/page/01");
        let built = pattern.build_page_url(&template, 9).unwrap();
        assert_eq!(built.as_str(), "https://flyers.example.com/page/09");
    }

    #[test]
    fn missing_marker_is_malformed() {
        let pattern = default_pattern();
        let err = pattern
            .extract_page_index(&url("https://flyers.example.com/catalog/12"))
            .unwrap_err();
        assert!(matches!(err, AcquireError::MalformedUrl { .. }));
    }

    #[test]
    fn digits_must_end_at_a_boundary() {
        let pattern = default_pattern();
        let err = pattern
            .extract_page_index(&url("https://flyers.example.com/page/12abc"))
            .unwrap_err();
        assert!(matches!(err, AcquireError::MalformedUrl { .. }));
    }

    #[test]
    fn multiple_page_segments_fail_loudly() {
        let pattern = default_pattern();
        let template = url("https://flyers.example.com/page/1/page/2");
        assert!(matches!(
            pattern.build_page_url(&template, 5),
            Err(AcquireError::MalformedUrl { .. })
        ));
    }

    #[test]
    fn custom_marker_is_escaped() {
        let pattern = PagePattern::new("?p=").unwrap();
        let u = url("https://flyers.example.com/view?p=4");
        assert_eq!(pattern.extract_page_index(&u).unwrap(), 4);
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        let pattern = default_pattern();
        let err = PageRange::from_urls(
            &url("https://flyers.example.com/page/5"),
            &url("https://flyers.example.com/page/1"),
            &pattern,
        )
        .unwrap_err();
        assert!(matches!(err, AcquireError::InvalidRange { first: 5, last: 1 }));
    }

    #[test]
    fn range_covers_first_through_last() {
        let pattern = default_pattern();
        let range = PageRange::from_urls(
            &url("https://flyers.example.com/page/2"),
            &url("https://flyers.example.com/page/6"),
            &pattern,
        )
        .unwrap();
        assert_eq!(range.indices().collect::<Vec<_>>(), vec![2, 3, 4, 5, 6]);
        assert_eq!(range.page_count(), 5);
    }
}
