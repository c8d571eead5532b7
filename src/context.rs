//! The per-response processing context.
//!
//! A [`Processor`] sits between one upstream response body and one
//! downstream consumer. Template bytes are fed in; a tree is built through
//! the parse events; processing passes drive the tree toward completion
//! while includes fetch in the background; rendering drains the completed
//! prefix into an outbound chain. Output is released downstream only once
//! the tree provably cannot fail any more, so a client never sees half a
//! document that later turns into an error page.
//!
//! Everything is single-threaded and event-driven: `feed`, `finish_input`,
//! `sub_request_done` and `read` each run one kick of the control loop and
//! return.

use crate::cache::TemplateCache;
use crate::error::EsiError;
use crate::fetch::{Fetcher, FetchOutcome, SubRequest, forwardable_headers};
use http::{HeaderMap, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use surrogate_markup::{CustomScanner, MarkupError, ParseClient, PushParser};
use surrogate_segment::SegmentList;
use surrogate_tree::{
    CachedTemplate, NodeId, ProcessEnv, Status, SubRequestId, Tree, evaluate_test,
};
use surrogate_vars::VarState;

/// Upper bound on element nesting while building the tree.
const MAX_PARSE_DEPTH: usize = 10;

/// Response statuses that are never processed: there is no body, or the
/// body must pass through untouched.
pub fn always_passthrough(status: StatusCode) -> bool {
    matches!(status.as_u16(), 100 | 101 | 102 | 204 | 304)
}

/// Result of one downstream read.
#[derive(Debug, PartialEq, Eq)]
pub enum Read {
    /// `n` bytes were copied into the caller's buffer.
    Data(usize),
    /// Nothing releasable yet; feed more input or await sub-requests.
    Pending,
    /// The document is complete and fully drained.
    End,
}

#[derive(Default)]
struct Flags {
    finished_template: bool,
    finished: bool,
    errored: bool,
    ok_to_send: bool,
    detached: bool,
    kicked: bool,
}

pub struct Processor {
    tree: Tree,
    /// Present while the template is still being parsed.
    parser: Option<CustomScanner>,
    /// Build stack; the bottom entry is the tree root.
    stack: Vec<NodeId>,
    parse_error: Option<String>,
    vars: VarState,
    incoming: SegmentList,
    outbound: SegmentList,
    pending: HashMap<SubRequestId, NodeId>,
    next_sub: u64,
    fetcher: Box<dyn Fetcher>,
    cacheable: Option<Arc<CachedTemplate>>,
    error_status: StatusCode,
    error_message: Option<String>,
    /// Bytes already handed downstream.
    sent: u64,
    flags: Flags,
}

impl Processor {
    /// A processor for a fresh template, parameterised by the client
    /// request it is answering.
    pub fn new(headers: HeaderMap, uri: &str, fetcher: Box<dyn Fetcher>) -> Self {
        let tree = Tree::new();
        let root = tree.root();
        Processor {
            tree,
            parser: Some(CustomScanner::new()),
            stack: vec![root],
            parse_error: None,
            vars: VarState::new(headers, uri),
            incoming: SegmentList::new(),
            outbound: SegmentList::new(),
            pending: HashMap::new(),
            next_sub: 0,
            fetcher,
            cacheable: None,
            error_status: StatusCode::INTERNAL_SERVER_ERROR,
            error_message: None,
            sent: 0,
            flags: Flags::default(),
        }
    }

    /// A processor replaying a cached template: no parsing, no input
    /// expected. `when` clauses are re-decided against this request.
    pub fn from_cached(
        template: Arc<CachedTemplate>,
        headers: HeaderMap,
        uri: &str,
        fetcher: Box<dyn Fetcher>,
    ) -> Self {
        let mut vars = VarState::new(headers, uri);
        let tree = template.instantiate(&mut vars);
        let root = tree.root();
        log::debug!("replaying cached template for '{uri}'");
        Processor {
            tree,
            parser: None,
            stack: vec![root],
            parse_error: None,
            vars,
            incoming: SegmentList::new(),
            outbound: SegmentList::new(),
            pending: HashMap::new(),
            next_sub: 0,
            fetcher,
            cacheable: Some(template),
            error_status: StatusCode::INTERNAL_SERVER_ERROR,
            error_message: None,
            sent: 0,
            flags: Flags {
                finished_template: true,
                ..Flags::default()
            },
        }
    }

    /// Convenience constructor that consults (and later populates) a
    /// template cache keyed by `key`.
    pub fn with_cache(
        cache: &dyn TemplateCache,
        key: &str,
        headers: HeaderMap,
        uri: &str,
        fetcher: Box<dyn Fetcher>,
    ) -> Self {
        match cache.lookup(key) {
            Some(template) => Processor::from_cached(template, headers, uri, fetcher),
            None => Processor::new(headers, uri, fetcher),
        }
    }

    // --- Upstream side ---

    /// Append template bytes from the upstream response body.
    pub fn feed(&mut self, data: &[u8]) {
        if self.flags.detached || self.flags.errored || self.flags.finished_template {
            return;
        }
        self.incoming.append(data);
        self.kick();
    }

    /// The upstream body is complete.
    pub fn finish_input(&mut self) {
        if self.flags.detached || self.flags.errored {
            return;
        }
        self.flags.finished_template = true;
        self.kick();
    }

    /// Whether the processor still wants upstream body data.
    pub fn wants_input(&self) -> bool {
        !self.flags.finished_template && !self.flags.errored && !self.flags.detached
    }

    // --- Sub-request side ---

    /// Deliver the outcome of a sub-request issued through the fetcher.
    pub fn sub_request_done(&mut self, id: SubRequestId, outcome: FetchOutcome) {
        if self.flags.detached {
            return;
        }
        let Some(node) = self.pending.remove(&id) else {
            log::debug!("outcome for unknown sub-request {id:?}");
            return;
        };
        let content = match outcome {
            FetchOutcome::Success(data) => Some(data),
            FetchOutcome::Failed => None,
        };
        self.tree.sub_request_done(node, id, content);
        self.kick();
    }

    // --- Downstream side ---

    /// Copy releasable output into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> Read {
        if self.flags.detached {
            return Read::End;
        }
        self.kick();
        if !self.flags.ok_to_send {
            return Read::Pending;
        }
        let n = self.outbound.read_into(buf);
        if n > 0 {
            self.sent += n as u64;
            return Read::Data(n);
        }
        if self.flags.finished {
            Read::End
        } else {
            Read::Pending
        }
    }

    /// The downstream client is gone; drop all state. Outstanding
    /// sub-request outcomes are ignored from here on.
    pub fn detach(&mut self) {
        log::debug!("downstream detached, discarding context");
        self.flags.detached = true;
        self.tree.teardown();
        self.stack.clear();
        self.pending.clear();
        self.incoming.clear();
        self.outbound.clear();
        self.parser = None;
        self.cacheable = None;
    }

    // --- Introspection for the host ---

    /// `Vary` value covering the request headers the template read, once
    /// processing has referenced them.
    pub fn vary_header(&self) -> Option<String> {
        self.vars.vary_header()
    }

    /// Request-neutral snapshot of the parsed template, available from the
    /// moment the template has fully parsed.
    pub fn cacheable_template(&self) -> Option<Arc<CachedTemplate>> {
        self.cacheable.clone()
    }

    /// Store the snapshot, if any, into `cache` under `key`.
    pub fn store_template(&self, cache: &dyn TemplateCache, key: &str) {
        if let Some(template) = self.cacheable_template() {
            cache.store(key, template);
        }
    }

    pub fn failed(&self) -> bool {
        self.flags.errored
    }

    /// Status the host should put on the response when processing failed
    /// before anything was sent.
    pub fn error_status(&self) -> StatusCode {
        self.error_status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    // --- Control loop ---

    fn kick(&mut self) {
        if self.flags.kicked || self.flags.detached {
            return;
        }
        self.flags.kicked = true;
        if !self.flags.finished && !self.flags.errored {
            self.process_stage();
        }
        if !self.flags.errored && !self.flags.detached {
            self.tree.render(&mut self.outbound);
            if !self.tree.may_fail() {
                self.flags.ok_to_send = true;
            }
        }
        self.flags.kicked = false;
    }

    fn process_stage(&mut self) {
        if self.parser.is_some() {
            if let Err(e) = self.parse_buffered() {
                let message = format!("template parse failure: {e}");
                self.fail(StatusCode::INTERNAL_SERVER_ERROR, &message);
                return;
            }
        }
        if !self.flags.finished_template {
            return;
        }

        let mut env = ProcessEnv::new(&mut self.vars, &mut self.next_sub);
        let status = self.tree.process(&mut env);
        let fetches = env.fetches;
        for fetch in fetches {
            self.pending.insert(fetch.id, fetch.node);
            let headers = forwardable_headers(self.vars.request_headers());
            self.fetcher.start(SubRequest {
                id: fetch.id,
                url: fetch.url,
                headers,
            });
        }
        match status {
            Status::Failed => {
                if self.sent == 0 {
                    self.fail(StatusCode::INTERNAL_SERVER_ERROR, "template processing failure");
                } else {
                    // Too late for an error page; the stream just ends.
                    log::error!("processing failed after {} byte(s) were sent", self.sent);
                    self.flags.errored = true;
                    self.flags.finished = true;
                    self.outbound.clear();
                }
            }
            Status::Complete => {
                self.flags.finished = true;
            }
            _ => {}
        }
    }

    /// Push buffered upstream bytes through the parser. The scanner holds
    /// them until end of stream, then replays the whole template as events
    /// into this context.
    fn parse_buffered(&mut self) -> Result<(), EsiError> {
        let at_end = self.flags.finished_template;
        if self.incoming.is_empty() && !at_end {
            return Ok(());
        }
        let Some(mut parser) = self.parser.take() else {
            return Ok(());
        };
        let data = self.incoming.flatten();
        self.incoming.clear();
        let result = parser.parse(self, &data, at_end);
        if !at_end {
            self.parser = Some(parser);
        }
        self.check_parse_result(result, at_end)
    }

    fn check_parse_result(
        &mut self,
        result: Result<(), MarkupError>,
        at_end: bool,
    ) -> Result<(), EsiError> {
        result?;
        if let Some(message) = self.parse_error.take() {
            return Err(EsiError::Structure(message));
        }
        if at_end {
            debug_assert_eq!(self.stack.len(), 1);
            self.cacheable = Some(Arc::new(self.tree.make_cacheable()));
            log::debug!("template parsed; tree ready");
        }
        Ok(())
    }

    /// Abort processing and replace all pending output with an error page.
    /// Only reachable while nothing has been sent downstream.
    fn fail(&mut self, status: StatusCode, message: &str) {
        log::error!("processing aborted: {message}");
        debug_assert_eq!(self.sent, 0);
        self.flags.errored = true;
        self.flags.finished = true;
        self.flags.ok_to_send = true;
        self.error_status = status;
        self.error_message = Some(message.to_string());
        self.tree.teardown();
        self.stack.clear();
        self.pending.clear();
        self.incoming.clear();
        self.parser = None;
        self.cacheable = None;
        self.outbound.clear();
        if self.sent == 0 {
            self.outbound.append(error_body(status, message).as_bytes());
        }
    }

    // --- Tree building (parse event handlers below) ---

    fn add_literal(&mut self, bytes: &[u8]) {
        if self.parse_error.is_some() {
            return;
        }
        let Some(&top) = self.stack.last() else {
            return;
        };
        let literal = self.tree.new_literal(bytes);
        if !self.tree.add_child(top, literal) {
            self.parse_error = Some("surface text not allowed in this element".to_string());
        }
    }

    fn attach_element(&mut self, node: NodeId, name: &str) {
        let Some(&top) = self.stack.last() else {
            self.parse_error = Some("element outside any document".to_string());
            return;
        };
        if self.tree.add_child(top, node) {
            self.stack.push(node);
        } else {
            self.parse_error = Some(format!("failed to add {name} element to its parent"));
        }
    }
}

impl ParseClient for Processor {
    fn start_element(&mut self, name: &str, attrs: &[(String, String)]) {
        if self.parse_error.is_some() {
            return;
        }
        if self.stack.len() >= MAX_PARSE_DEPTH {
            self.parse_error = Some("template elements nested too deeply".to_string());
            return;
        }
        let Some(element) = identify(name) else {
            // Unrecognised namespaced tag: reconstitute it as surface text.
            let text = serialize_open_tag(name, attrs);
            self.add_literal(text.as_bytes());
            return;
        };
        let node = match element {
            Element::Include => self.tree.new_include(attrs),
            Element::Comment => self.tree.new_comment(),
            Element::Remove => self.tree.new_remove(),
            Element::Vars => self.tree.new_vars(),
            Element::Choose => self.tree.new_choose(),
            Element::When => {
                let raw = attr(attrs, "test").unwrap_or_default();
                let value = evaluate_test(&raw, &mut self.vars);
                self.tree.new_when(raw, value)
            }
            Element::Otherwise => self.tree.new_otherwise(),
            Element::Try => self.tree.new_try(),
            Element::Attempt => self.tree.new_attempt(),
            Element::Except => self.tree.new_except(),
            Element::Assign => {
                let Some(var_name) = attr(attrs, "name") else {
                    self.parse_error = Some("assign element without a name".to_string());
                    return;
                };
                self.tree.new_assign(var_name, attr(attrs, "value"))
            }
        };
        self.attach_element(node, name);
    }

    fn end_element(&mut self, name: &str) {
        if self.parse_error.is_some() {
            return;
        }
        if identify(name).is_none() {
            self.add_literal(format!("</{name}>").as_bytes());
            return;
        }
        if self.stack.len() > 1 {
            self.stack.pop();
        } else {
            self.parse_error = Some(format!("unexpected closing {name}"));
        }
    }

    fn text(&mut self, data: &[u8]) {
        self.add_literal(data);
    }

    fn comment(&mut self, body: &str) {
        if self.parse_error.is_some() {
            return;
        }
        // `<!--esi ... -->` re-parses its body as markup, wrapped in a
        // synthetic container element; other comments pass through.
        if let Some(inner) = body.strip_prefix("esi") {
            let wrapped = format!("<div>{inner}</div>");
            let mut scanner = CustomScanner::new();
            if let Err(e) = scanner.parse(self, wrapped.as_bytes(), true) {
                self.parse_error = Some(format!("comment body parse failure: {e}"));
            }
        } else {
            self.add_literal(format!("<!--{body}-->").as_bytes());
        }
    }
}

#[derive(Clone, Copy)]
enum Element {
    Include,
    Comment,
    Remove,
    Vars,
    Choose,
    When,
    Otherwise,
    Try,
    Attempt,
    Except,
    Assign,
}

const NS_SHORT: &str = "esi:";
const NS_LONG: &str = "http://www.edge-delivery.org/esi/1.0|";

/// Map a tag name onto a known element. The namespace prefix matches
/// case-insensitively; local names are exact.
fn identify(name: &str) -> Option<Element> {
    let local = if name.len() >= NS_SHORT.len()
        && name[..NS_SHORT.len()].eq_ignore_ascii_case(NS_SHORT)
    {
        &name[NS_SHORT.len()..]
    } else if let Some(rest) = name.strip_prefix(NS_LONG) {
        rest
    } else {
        return None;
    };
    match local {
        "include" => Some(Element::Include),
        "comment" => Some(Element::Comment),
        "remove" => Some(Element::Remove),
        "vars" => Some(Element::Vars),
        "choose" => Some(Element::Choose),
        "when" => Some(Element::When),
        "otherwise" => Some(Element::Otherwise),
        "try" => Some(Element::Try),
        "attempt" => Some(Element::Attempt),
        "except" => Some(Element::Except),
        "assign" => Some(Element::Assign),
        _ => None,
    }
}

fn attr(attrs: &[(String, String)], wanted: &str) -> Option<String> {
    attrs
        .iter()
        .find(|(name, _)| name == wanted)
        .map(|(_, value)| value.clone())
}

fn serialize_open_tag(name: &str, attrs: &[(String, String)]) -> String {
    let mut out = format!("<{name}");
    for (attr_name, value) in attrs {
        out.push(' ');
        out.push_str(attr_name);
        out.push_str("=\"");
        out.push_str(&value.replace('"', "&quot;"));
        out.push('"');
    }
    out.push('>');
    out
}

fn error_body(status: StatusCode, message: &str) -> String {
    format!(
        "<html><head><title>Processing failed</title></head>\
         <body><h1>{status}</h1><p>{message}</p></body></html>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_statuses() {
        for code in [100u16, 101, 102, 204, 304] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(always_passthrough(status), "{code}");
        }
        for code in [200u16, 206, 301, 404, 500] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(!always_passthrough(status), "{code}");
        }
    }

    #[test]
    fn unknown_tags_survive_as_text() {
        assert_eq!(
            serialize_open_tag("esi:future", &[("a".into(), "x\"y".into())]),
            "<esi:future a=\"x&quot;y\">"
        );
    }

    #[test]
    fn identification_is_prefix_insensitive_and_local_exact() {
        assert!(identify("esi:include").is_some());
        assert!(identify("ESI:include").is_some());
        assert!(identify("esi:INCLUDE").is_none());
        assert!(identify("esi:bogus").is_none());
        assert!(identify("div").is_none());
        assert!(identify("http://www.edge-delivery.org/esi/1.0|try").is_some());
    }
}
