//! HTML⇄USFM conversion.
//!
//! The rich in-browser editor and its markup stylesheet are out of scope
//! here; this is a minimal converter that treats the editor payload as
//! USFM text carried verbatim, normalizing line endings, so the save
//! pipeline and sync protocol have a real [`HtmlUsfmConverter`] to run
//! against instead of a mock in every call site.

use scriptura_core::save::HtmlUsfmConverter;

pub struct PassthroughConverter;

impl HtmlUsfmConverter for PassthroughConverter {
    fn html_to_usfm(&self, html: &str) -> Result<String, String> {
        Ok(html.replace("\r\n", "\n"))
    }

    fn usfm_to_html(&self, usfm: &str) -> Result<String, String> {
        Ok(usfm.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_crlf_to_lf() {
        let converter = PassthroughConverter;
        assert_eq!(
            converter.html_to_usfm("\\c 1\r\n\\v 1 a\r\n").unwrap(),
            "\\c 1\n\\v 1 a\n"
        );
    }
}
