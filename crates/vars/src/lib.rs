//! Per-request variable state: the request snapshot behind `$(...)`
//! substitution, the resolvers for the built-in variables, and the
//! derivation of the response `Vary` header from which variables a template
//! actually referenced.

mod agent;
mod substitute;

use agent::UserAgent;
use http::HeaderMap;
use http::header;
use std::collections::HashMap;
use surrogate_segment::SegmentList;

/// Which built-in variables a template referenced, for `Vary` derivation.
#[derive(Debug, Clone, Copy, Default)]
struct Referenced {
    language: bool,
    cookie: bool,
    host: bool,
    referer: bool,
    user_agent: bool,
}

/// Request-scoped variable state.
///
/// Holds a snapshot of the request headers and pre-split query string, plus
/// any variables assigned by the template itself. Input text is fed in,
/// then extracted with every well-formed `$(...)` construct replaced.
pub struct VarState {
    headers: HeaderMap,
    query_string: String,
    query: Vec<(String, String)>,
    user_agent: UserAgent,
    locals: HashMap<String, String>,
    referenced: Referenced,
    input: SegmentList,
}

impl VarState {
    pub fn new(headers: HeaderMap, uri: &str) -> Self {
        let query_string = uri
            .split_once('?')
            .map(|(_, qs)| qs.to_string())
            .unwrap_or_default();
        let query = url::form_urlencoded::parse(query_string.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let user_agent = UserAgent::identify(header_str(&headers, header::USER_AGENT));
        VarState {
            headers,
            query_string,
            query,
            user_agent,
            locals: HashMap::new(),
            referenced: Referenced::default(),
            input: SegmentList::new(),
        }
    }

    /// Queue template text for substitution.
    pub fn feed(&mut self, data: &[u8]) {
        self.input.append(data);
    }

    /// Run substitution over everything fed so far, returning the rewritten
    /// chain and clearing the pending input.
    pub fn extract_list(&mut self) -> SegmentList {
        let buffer = self.input.flatten();
        self.input.clear();
        let mut out = SegmentList::new();
        substitute::process_buffer(self, &buffer, &mut out);
        out
    }

    pub fn extract_string(&mut self) -> String {
        self.extract_list().flatten_string()
    }

    /// One-shot substitution of a small string, as used for `test` and
    /// `src` attributes.
    pub fn substitute(&mut self, text: &str) -> String {
        self.feed(text.as_bytes());
        self.extract_string()
    }

    /// Bind a template-assigned variable, shadowing built-ins of the same
    /// name.
    pub fn set_variable(&mut self, name: &str, value: String) {
        self.locals.insert(name.to_string(), value);
    }

    /// The request headers this state was built from.
    pub fn request_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Space-separated list of request headers the template depended on, or
    /// `None` when the output is invariant across requests.
    pub fn vary_header(&self) -> Option<String> {
        let mut names: Vec<&str> = Vec::new();
        if self.referenced.language {
            names.push("Accept-Language");
        }
        if self.referenced.cookie {
            names.push("Cookie");
        }
        if self.referenced.host {
            names.push("Host");
        }
        if self.referenced.referer {
            names.push("Referer");
        }
        if self.referenced.user_agent {
            names.push("User-Agent");
        }
        if names.is_empty() {
            None
        } else {
            Some(names.join(" "))
        }
    }

    /// Resolve one variable reference and append its value to `out`.
    pub(crate) fn eval_var(
        &mut self,
        name: &[u8],
        subref: Option<&[u8]>,
        default: Option<&[u8]>,
        out: &mut SegmentList,
    ) {
        let name = String::from_utf8_lossy(name).into_owned();
        let subref = subref.map(|s| String::from_utf8_lossy(s).into_owned());
        let default = default.map(|s| String::from_utf8_lossy(s).into_owned());

        let value = if let Some(local) = self.locals.get(&name) {
            Some(local.clone())
        } else {
            self.eval_builtin(&name, subref.as_deref())
        };
        match value.or(default) {
            Some(v) => out.append(v.as_bytes()),
            None => log::debug!("variable '{name}' is unset and has no default"),
        }
    }

    fn eval_builtin(&mut self, name: &str, subref: Option<&str>) -> Option<String> {
        match name {
            "HTTP_ACCEPT_LANGUAGE" => {
                self.referenced.language = true;
                let list = header_opt(&self.headers, header::ACCEPT_LANGUAGE)?;
                match subref {
                    // With a subref the reference is a membership test.
                    Some(lang) => Some(list_has_member(list, lang).to_string()),
                    None => Some(list.to_string()),
                }
            }
            "HTTP_COOKIE" => {
                self.referenced.cookie = true;
                let cookies = header_opt(&self.headers, header::COOKIE)?;
                match subref {
                    Some(wanted) => cookie_value(cookies, wanted).map(str::to_string),
                    None => Some(cookies.to_string()),
                }
            }
            "HTTP_HOST" => {
                self.referenced.host = true;
                header_opt(&self.headers, header::HOST).map(str::to_string)
            }
            "HTTP_REFERER" => {
                self.referenced.referer = true;
                header_opt(&self.headers, header::REFERER).map(str::to_string)
            }
            "HTTP_USER_AGENT" => {
                self.referenced.user_agent = true;
                match subref {
                    Some("os") => Some(self.user_agent.os.to_string()),
                    Some("browser") => Some(self.user_agent.browser.to_string()),
                    Some("version") => Some(self.user_agent.version.clone()),
                    Some(_) => Some(String::new()),
                    None => Some(self.user_agent.raw.clone()),
                }
            }
            "QUERY_STRING" => match subref {
                Some(key) => self
                    .query
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone()),
                None => Some(self.query_string.clone()),
            },
            _ => {
                log::debug!("unknown variable '{name}'");
                None
            }
        }
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> &str {
    headers
        .get(&name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn header_opt(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(&name).and_then(|v| v.to_str().ok())
}

// "en-gb, da;q=0.8" has member "da" but not "d".
fn list_has_member(list: &str, wanted: &str) -> bool {
    list.split(',')
        .map(|item| item.split(';').next().unwrap_or("").trim())
        .any(|tag| tag.eq_ignore_ascii_case(wanted))
}

fn cookie_value<'a>(cookies: &'a str, wanted: &str) -> Option<&'a str> {
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == wanted).then_some(value)
    })
}
