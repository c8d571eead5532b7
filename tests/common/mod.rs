#![allow(dead_code)]

use http::HeaderMap;
use std::cell::RefCell;
use std::rc::Rc;
use surrogate::{FetchOutcome, Fetcher, Processor, Read, SegmentList, SubRequest};

/// Shared log of the sub-requests a processor issued.
pub type Requests = Rc<RefCell<Vec<SubRequest>>>;

struct RecordingFetcher(Requests);

impl Fetcher for RecordingFetcher {
    fn start(&mut self, request: SubRequest) {
        self.0.borrow_mut().push(request);
    }
}

pub fn fetcher() -> (Box<dyn Fetcher>, Requests) {
    let requests: Requests = Requests::default();
    (Box::new(RecordingFetcher(requests.clone())), requests)
}

pub fn processor_with(headers: HeaderMap, uri: &str) -> (Processor, Requests) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (fetcher, requests) = fetcher();
    (Processor::new(headers, uri, fetcher), requests)
}

pub fn processor() -> (Processor, Requests) {
    processor_with(HeaderMap::new(), "/")
}

/// Feed the whole template and mark the upstream body complete.
pub fn feed_template(p: &mut Processor, template: &str) {
    p.feed(template.as_bytes());
    p.finish_input();
}

/// Read until the processor stops yielding. Returns the output so far and
/// whether the stream ended.
pub fn drain(p: &mut Processor) -> (String, bool) {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        match p.read(&mut buf) {
            Read::Data(n) => out.extend_from_slice(&buf[..n]),
            Read::Pending => return (String::from_utf8_lossy(&out).into_owned(), false),
            Read::End => return (String::from_utf8_lossy(&out).into_owned(), true),
        }
    }
}

/// Read to the end, asserting the document completes.
pub fn drain_to_end(p: &mut Processor) -> String {
    let (out, ended) = drain(p);
    assert!(ended, "document did not complete; got {out:?}");
    out
}

/// Complete the sub-request that was issued for `url`.
pub fn deliver(p: &mut Processor, requests: &Requests, url: &str, outcome: FetchOutcome) {
    let id = requests
        .borrow()
        .iter()
        .find(|r| r.url == url)
        .map(|r| r.id)
        .unwrap_or_else(|| panic!("no sub-request issued for '{url}'"));
    p.sub_request_done(id, outcome);
}

pub fn success(body: &str) -> FetchOutcome {
    FetchOutcome::Success(SegmentList::from_bytes(body.as_bytes()))
}
