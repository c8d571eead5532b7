//! The boundary through which includes become upstream sub-requests.

use http::HeaderMap;
use http::header;
use surrogate_segment::SegmentList;
use surrogate_tree::SubRequestId;

/// One sub-request the processor wants fetched. Headers are the parent
/// request's, minus the hop-by-hop set.
#[derive(Debug)]
pub struct SubRequest {
    pub id: SubRequestId,
    pub url: String,
    pub headers: HeaderMap,
}

/// Host-provided transport for sub-requests.
///
/// `start` must not block; the host reports completion later through
/// [`Processor::sub_request_done`](crate::Processor::sub_request_done) with
/// the same id. Exactly one outcome per started request.
pub trait Fetcher {
    fn start(&mut self, request: SubRequest);
}

/// Terminal outcome of a sub-request. Any non-2xx or transport failure is
/// simply `Failed`; the processor does not distinguish why.
#[derive(Debug)]
pub enum FetchOutcome {
    Success(SegmentList),
    Failed,
}

/// Copy of the client headers suitable for forwarding upstream.
pub(crate) fn forwardable_headers(source: &HeaderMap) -> HeaderMap {
    const HOP_BY_HOP: &[&str] = &[
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "upgrade",
    ];
    let mut headers = source.clone();
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
    headers
}
