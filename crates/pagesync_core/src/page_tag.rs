//! Managed marker block at the top of generated page templates.

use std::sync::OnceLock;

use regex::Regex;

pub const TAG_BEGIN: &str = "<!-- BaserPageTagBegin -->";
pub const TAG_END: &str = "<!-- BaserPageTagEnd -->";

/// Fields rendered into a template file.
#[derive(Debug, Clone, Copy)]
pub struct TemplateFields<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub edit_link_id: Option<i64>,
    pub code: &'a str,
    pub contents: &'a str,
}

/// Metadata and body recovered from a template file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTemplate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub body: String,
}

pub fn render_page_template(fields: &TemplateFields<'_>) -> String {
    let mut out = String::new();
    out.push_str(TAG_BEGIN);
    out.push('\n');
    out.push_str(&format!(
        "<?php $this->BcBaser->setTitle('{}') ?>\n",
        escape_quoted(fields.title)
    ));
    out.push_str(&format!(
        "<?php $this->BcBaser->setDescription('{}') ?>\n",
        escape_quoted(fields.description)
    ));
    if let Some(id) = fields.edit_link_id {
        out.push_str(&format!("<?php $this->BcBaser->setPageEditLink({id}) ?>\n"));
    }
    let code = fields.code.trim();
    if !code.is_empty() {
        out.push_str(code);
        out.push('\n');
    }
    out.push_str(TAG_END);
    out.push_str("\n\n");
    out.push_str(fields.contents);
    out
}

pub fn parse_page_template(source: &str) -> ParsedTemplate {
    let title = capture_directive(title_pattern(), source);
    let description = capture_directive(description_pattern(), source);

    let body = title_pattern().replace_all(source, "");
    let body = description_pattern().replace_all(&body, "");
    let body = block_pattern().replace_all(&body, "").into_owned();

    ParsedTemplate {
        title,
        description,
        body,
    }
}

/// `about_us` -> `AboutUs`.
pub fn camelize(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

pub fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn unescape_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some(next @ ('\\' | '\'')) => out.push(next),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn capture_directive(pattern: &Regex, source: &str) -> Option<String> {
    pattern
        .captures(source)
        .and_then(|captures| captures.get(1))
        .map(|value| unescape_quoted(value.as_str().trim()))
}

fn title_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| directive_pattern("setTitle"))
}

fn description_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| directive_pattern("setDescription"))
}

fn block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<!-- BaserPageTagBegin -->.*?<!-- BaserPageTagEnd -->(?:\r?\n\r?\n)?")
            .expect("valid regex")
    })
}

fn directive_pattern(method: &str) -> Regex {
    let pattern = format!(
        r"(?is)<\?php\s+\$this->BcBaser->{method}\('((?:[^'\\]|\\.)*)'\)\s+\?>(?:\r?\n)?"
    );
    Regex::new(&pattern).expect("valid regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields<'a>(title: &'a str, description: &'a str, contents: &'a str) -> TemplateFields<'a> {
        TemplateFields {
            title,
            description,
            edit_link_id: Some(7),
            code: "",
            contents,
        }
    }

    #[test]
    fn render_produces_marker_block() {
        let rendered = render_page_template(&TemplateFields {
            code: "  <?php $x = 1 ?>  ",
            ..fields("About", "Who we are", "<p>Body</p>")
        });
        assert_eq!(
            rendered,
            "<!-- BaserPageTagBegin -->\n\
             <?php $this->BcBaser->setTitle('About') ?>\n\
             <?php $this->BcBaser->setDescription('Who we are') ?>\n\
             <?php $this->BcBaser->setPageEditLink(7) ?>\n\
             <?php $x = 1 ?>\n\
             <!-- BaserPageTagEnd -->\n\n<p>Body</p>"
        );
    }

    #[test]
    fn render_omits_edit_link_without_id() {
        let rendered = render_page_template(&TemplateFields {
            edit_link_id: None,
            ..fields("A", "", "")
        });
        assert!(!rendered.contains("setPageEditLink"));
    }

    #[test]
    fn parse_recovers_rendered_fields() {
        let rendered = render_page_template(&fields(
            "It's a \\ test",
            "Quote ') inside",
            "<h1>Hello</h1>\n<p>World</p>\n",
        ));
        let parsed = parse_page_template(&rendered);
        assert_eq!(parsed.title.as_deref(), Some("It's a \\ test"));
        assert_eq!(parsed.description.as_deref(), Some("Quote ') inside"));
        assert_eq!(parsed.body, "<h1>Hello</h1>\n<p>World</p>\n");
    }

    #[test]
    fn parse_handles_hand_written_files() {
        let parsed = parse_page_template(
            "<?php $this->BcBaser->setTitle(' Latest News ') ?>\n<p>news</p>",
        );
        assert_eq!(parsed.title.as_deref(), Some("Latest News"));
        assert_eq!(parsed.description, None);
        assert_eq!(parsed.body, "<p>news</p>");

        let plain = parse_page_template("<p>plain</p>");
        assert_eq!(plain.title, None);
        assert_eq!(plain.body, "<p>plain</p>");
    }

    #[test]
    fn camelize_joins_underscored_words() {
        assert_eq!(camelize("about_us"), "AboutUs");
        assert_eq!(camelize("index"), "Index");
        assert_eq!(camelize("company__profile"), "CompanyProfile");
    }

    #[test]
    fn unescape_keeps_unknown_sequences() {
        assert_eq!(unescape_quoted(r"a\nb"), r"a\nb");
        assert_eq!(unescape_quoted(&escape_quoted(r"c:\path\'x'")), r"c:\path\'x'");
    }
}
