//! The `$(NAME{subref}|'default')` scanner.
//!
//! A small explicit state machine walks the buffer byte by byte. Text that
//! turns out not to be a well-formed substitution is copied through
//! verbatim: on a malformed construct the scanner rewinds to just past the
//! opening `$(` and resumes plain scanning, so the original bytes reach the
//! output untouched.

use crate::VarState;
use surrogate_segment::SegmentList;

#[derive(Clone, Copy, PartialEq)]
enum State {
    Scan,
    Name,
    Access,
    SubRef,
    DefaultStart,
    QuotedDefault,
    BareDefault,
}

fn valid_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'-' || c == b'_' || c == b'.'
}

pub(crate) fn process_buffer(vars: &mut VarState, input: &[u8], out: &mut SegmentList) {
    let len = input.len();
    let mut pos = 0;
    // Start of the plain text not yet copied to the output.
    let mut done = 0;
    let mut state = State::Scan;
    let mut name_start = 0;
    let mut data_start = 0;
    let mut name: &[u8] = b"";
    let mut subref: Option<&[u8]> = None;
    let mut default: Option<&[u8]> = None;

    while pos < len {
        let c = input[pos];
        match state {
            State::Scan => {
                if c != b'$' {
                    pos += 1;
                } else {
                    if pos > done {
                        out.append(&input[done..pos]);
                    }
                    done = pos;
                    pos += 1;
                    if pos < len && input[pos] == b'(' {
                        pos += 1;
                        name_start = pos;
                        name = b"";
                        subref = None;
                        default = None;
                        state = State::Name;
                    }
                    // A lone '$' stays unflushed at `done` and is copied
                    // through by the next flush.
                }
            }
            State::Name => {
                if valid_name_char(c) {
                    pos += 1;
                } else {
                    name = &input[name_start..pos];
                    state = State::Access;
                }
            }
            State::Access => {
                if c == b')' {
                    vars.eval_var(name, subref, default, out);
                    pos += 1;
                    done = pos;
                    state = State::Scan;
                } else if c == b'{' && subref.is_none() && default.is_none() {
                    pos += 1;
                    data_start = pos;
                    state = State::SubRef;
                } else if c == b'|' && default.is_none() {
                    pos += 1;
                    data_start = pos;
                    state = State::DefaultStart;
                } else {
                    // Malformed; rescan just past the "$(".
                    pos = done + 2;
                    state = State::Scan;
                }
            }
            State::SubRef => {
                if c == b'}' {
                    subref = Some(&input[data_start..pos]);
                    pos += 1;
                    state = State::Access;
                } else if valid_name_char(c) || c == b'=' {
                    pos += 1;
                } else {
                    pos = done + 2;
                    state = State::Scan;
                }
            }
            State::DefaultStart => {
                if c == b'\'' {
                    pos += 1;
                    data_start = pos;
                    state = State::QuotedDefault;
                } else {
                    state = State::BareDefault;
                }
            }
            State::QuotedDefault => {
                if c == b'\'' {
                    default = Some(&input[data_start..pos]);
                    state = State::Access;
                }
                pos += 1;
            }
            State::BareDefault => {
                if c == b')' {
                    default = Some(&input[data_start..pos]);
                    vars.eval_var(name, subref, default, out);
                    pos += 1;
                    done = pos;
                    state = State::Scan;
                } else {
                    pos += 1;
                }
            }
        }
    }

    // Trailing plain text, including any construct left incomplete at end
    // of buffer.
    if len > done {
        out.append(&input[done..len]);
    }
}
