//! Push parsing of templated markup.
//!
//! The scanner recognises exactly three constructs: namespaced opening tags
//! (`<esi:...>`), their closing counterparts, and comments (`<!-- -->`).
//! Everything else is surface text and flows through untouched, whatever
//! the surrounding document happens to be. Recognised constructs are
//! reported to a [`ParseClient`] as discrete events; the scanner keeps no
//! document model of its own.

mod error;
mod scanner;

pub use error::MarkupError;
pub use scanner::CustomScanner;

/// Receiver for parse events.
///
/// A self-closing tag is reported as a start immediately followed by the
/// matching end.
pub trait ParseClient {
    fn start_element(&mut self, name: &str, attrs: &[(String, String)]);
    fn end_element(&mut self, name: &str);
    fn text(&mut self, data: &[u8]);
    fn comment(&mut self, body: &str);
}

/// A parser fed with body data as it arrives, in arbitrary chunks.
///
/// Implementations may buffer internally; events are only guaranteed to
/// have been delivered after the call with `end_of_stream` set.
pub trait PushParser {
    fn parse(
        &mut self,
        client: &mut dyn ParseClient,
        data: &[u8],
        end_of_stream: bool,
    ) -> Result<(), MarkupError>;
}
