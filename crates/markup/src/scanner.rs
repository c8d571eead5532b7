//! A hand-rolled whole-buffer scanner for the namespaced tag dialect.

use crate::{MarkupError, ParseClient, PushParser};

const OPEN_PREFIX: &[u8] = b"<esi:";
const CLOSE_PREFIX: &[u8] = b"</esi:";
const COMMENT_PREFIX: &[u8] = b"<!--";

#[derive(Clone, Copy, PartialEq)]
enum TagKind {
    Open,
    Close,
    Comment,
}

/// Buffers input until end of stream, then scans it in one pass. Chunk
/// boundaries therefore never split a construct.
#[derive(Default)]
pub struct CustomScanner {
    content: Vec<u8>,
}

impl CustomScanner {
    pub fn new() -> Self {
        CustomScanner::default()
    }
}

impl PushParser for CustomScanner {
    fn parse(
        &mut self,
        client: &mut dyn ParseClient,
        data: &[u8],
        end_of_stream: bool,
    ) -> Result<(), MarkupError> {
        self.content.extend_from_slice(data);
        if !end_of_stream {
            return Ok(());
        }
        let content = std::mem::take(&mut self.content);
        scan(&content, client)
    }
}

fn scan(content: &[u8], client: &mut dyn ParseClient) -> Result<(), MarkupError> {
    let mut pos = 0;
    let mut open_tags = 0usize;
    while let Some((offset, kind)) = find_tag(&content[pos..]) {
        if offset > 0 {
            client.text(&content[pos..pos + offset]);
        }
        let tag_start = pos + offset;
        pos = match kind {
            TagKind::Open => open_tag(content, tag_start, client, &mut open_tags)?,
            TagKind::Close => {
                if open_tags == 0 {
                    return Err(MarkupError::UnbalancedClose);
                }
                open_tags -= 1;
                close_tag(content, tag_start, client)?
            }
            TagKind::Comment => comment(content, tag_start, client)?,
        };
    }
    if pos < content.len() {
        client.text(&content[pos..]);
    }
    if open_tags != 0 {
        return Err(MarkupError::UnclosedTags(open_tags));
    }
    Ok(())
}

/// Earliest construct in `haystack`, as (offset, kind). Prefix matching is
/// case-insensitive.
fn find_tag(haystack: &[u8]) -> Option<(usize, TagKind)> {
    for (i, &b) in haystack.iter().enumerate() {
        if b != b'<' {
            continue;
        }
        let rest = &haystack[i..];
        if has_prefix(rest, CLOSE_PREFIX) {
            return Some((i, TagKind::Close));
        }
        if has_prefix(rest, OPEN_PREFIX) {
            return Some((i, TagKind::Open));
        }
        if has_prefix(rest, COMMENT_PREFIX) {
            return Some((i, TagKind::Comment));
        }
    }
    None
}

fn has_prefix(bytes: &[u8], prefix: &[u8]) -> bool {
    bytes.len() >= prefix.len() && bytes[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn open_tag(
    content: &[u8],
    tag_start: usize,
    client: &mut dyn ParseClient,
    open_tags: &mut usize,
) -> Result<usize, MarkupError> {
    let tag_end = find_byte(content, tag_start, b'>').ok_or(MarkupError::UnterminatedTag)?;
    let self_closing = content[tag_end - 1] == b'/';
    let body_end = if self_closing { tag_end - 1 } else { tag_end };

    let name_end = content[tag_start + 1..body_end]
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .map(|i| tag_start + 1 + i)
        .unwrap_or(body_end);
    let name = String::from_utf8_lossy(&content[tag_start + 1..name_end]).into_owned();
    let attrs = parse_attributes(&content[name_end..body_end])?;

    log::trace!("open tag '{name}' with {} attribute(s)", attrs.len());
    client.start_element(&name, &attrs);
    if self_closing {
        client.end_element(&name);
    } else {
        *open_tags += 1;
    }
    Ok(tag_end + 1)
}

fn close_tag(
    content: &[u8],
    tag_start: usize,
    client: &mut dyn ParseClient,
) -> Result<usize, MarkupError> {
    let tag_end = find_byte(content, tag_start, b'>').ok_or(MarkupError::UnterminatedTag)?;
    let name = String::from_utf8_lossy(&content[tag_start + 2..tag_end])
        .trim()
        .to_string();
    client.end_element(&name);
    Ok(tag_end + 1)
}

fn comment(
    content: &[u8],
    tag_start: usize,
    client: &mut dyn ParseClient,
) -> Result<usize, MarkupError> {
    let body_start = tag_start + COMMENT_PREFIX.len();
    let end = content[body_start..]
        .windows(3)
        .position(|w| w == b"-->")
        .map(|i| body_start + i)
        .ok_or(MarkupError::UnterminatedComment)?;
    let body = String::from_utf8_lossy(&content[body_start..end]);
    client.comment(&body);
    Ok(end + 3)
}

fn find_byte(content: &[u8], from: usize, wanted: u8) -> Option<usize> {
    content[from..].iter().position(|&b| b == wanted).map(|i| from + i)
}

/// Attribute grammar: `name = 'value'` or `name = "value"`. The `=` and a
/// quoting delimiter are both mandatory.
fn parse_attributes(region: &[u8]) -> Result<Vec<(String, String)>, MarkupError> {
    let mut attrs = Vec::new();
    let mut i = 0;
    while i < region.len() {
        while i < region.len() && (region[i].is_ascii_whitespace() || region[i] == b'/') {
            i += 1;
        }
        if i >= region.len() {
            break;
        }
        let name_start = i;
        while i < region.len() && !region[i].is_ascii_whitespace() && region[i] != b'=' {
            i += 1;
        }
        let name = String::from_utf8_lossy(&region[name_start..i]).into_owned();
        while i < region.len() && region[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= region.len() || region[i] != b'=' {
            return Err(MarkupError::MissingAttributeValue);
        }
        i += 1;
        while i < region.len() && region[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= region.len() {
            return Err(MarkupError::MissingAttributeValue);
        }
        let delim = region[i];
        if delim != b'\'' && delim != b'"' {
            return Err(MarkupError::UnknownDelimiter(delim as char));
        }
        i += 1;
        let value_start = i;
        while i < region.len() && region[i] != delim {
            i += 1;
        }
        if i >= region.len() {
            return Err(MarkupError::UnterminatedValue);
        }
        let value = String::from_utf8_lossy(&region[value_start..i]).into_owned();
        attrs.push((name, value));
        i += 1;
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ParseClient for Recorder {
        fn start_element(&mut self, name: &str, attrs: &[(String, String)]) {
            let attrs: Vec<String> = attrs.iter().map(|(k, v)| format!("{k}={v}")).collect();
            self.events.push(format!("start {name} [{}]", attrs.join(",")));
        }
        fn end_element(&mut self, name: &str) {
            self.events.push(format!("end {name}"));
        }
        fn text(&mut self, data: &[u8]) {
            self.events
                .push(format!("text {}", String::from_utf8_lossy(data)));
        }
        fn comment(&mut self, body: &str) {
            self.events.push(format!("comment {body}"));
        }
    }

    fn events(input: &str) -> Result<Vec<String>, MarkupError> {
        let mut recorder = Recorder::default();
        let mut scanner = CustomScanner::new();
        scanner.parse(&mut recorder, input.as_bytes(), true)?;
        Ok(recorder.events)
    }

    #[test]
    fn plain_text_is_a_single_event() {
        assert_eq!(events("<p>hi & bye</p>").unwrap(), vec!["text <p>hi & bye</p>"]);
    }

    #[test]
    fn open_and_close_tags() {
        assert_eq!(
            events("a<esi:vars>b</esi:vars>c").unwrap(),
            vec![
                "text a",
                "start esi:vars []",
                "text b",
                "end esi:vars",
                "text c",
            ]
        );
    }

    #[test]
    fn self_closing_emits_start_then_end() {
        assert_eq!(
            events("<esi:include src='/frag'/>").unwrap(),
            vec!["start esi:include [src=/frag]", "end esi:include"]
        );
    }

    #[test]
    fn both_quote_delimiters_work() {
        assert_eq!(
            events("<esi:include src=\"/a\" alt='/b'/>").unwrap(),
            vec!["start esi:include [src=/a,alt=/b]", "end esi:include"]
        );
    }

    #[test]
    fn tag_matching_is_case_insensitive() {
        assert_eq!(
            events("<ESI:comment text='x'/>").unwrap(),
            vec!["start ESI:comment [text=x]", "end ESI:comment"]
        );
    }

    #[test]
    fn comments_are_reported_verbatim() {
        assert_eq!(
            events("a<!-- keep -->b").unwrap(),
            vec!["text a", "comment  keep ", "text b"]
        );
    }

    #[test]
    fn chunks_may_split_anywhere() {
        let mut recorder = Recorder::default();
        let mut scanner = CustomScanner::new();
        scanner.parse(&mut recorder, b"x<esi:va", false).unwrap();
        scanner.parse(&mut recorder, b"rs>y</e", false).unwrap();
        scanner.parse(&mut recorder, b"si:vars>", true).unwrap();
        assert_eq!(
            recorder.events,
            vec!["text x", "start esi:vars []", "text y", "end esi:vars"]
        );
    }

    #[test]
    fn attribute_errors() {
        assert_eq!(
            events("<esi:include src/>"),
            Err(MarkupError::MissingAttributeValue)
        );
        assert_eq!(
            events("<esi:include src=frag/>"),
            Err(MarkupError::UnknownDelimiter('f'))
        );
        assert_eq!(
            events("<esi:include src='frag>"),
            Err(MarkupError::UnterminatedValue)
        );
    }

    #[test]
    fn balance_errors() {
        assert_eq!(events("</esi:vars>"), Err(MarkupError::UnbalancedClose));
        assert_eq!(events("<esi:vars>x"), Err(MarkupError::UnclosedTags(1)));
        assert_eq!(events("<!-- x"), Err(MarkupError::UnterminatedComment));
    }
}
