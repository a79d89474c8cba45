//! Minimal DNS wire-format helpers: header field access, question-name
//! extraction, and REFUSED/SERVFAIL reply construction.
//!
//! Parsing/validating the extracted name goes through `domain::base::Name`
//! (the crate used elsewhere in this codebase for DNS name handling);
//! header/ID manipulation is done directly on the wire bytes, since mirroring
//! a query's ID and counts is simpler as byte surgery than round-tripping
//! through a full message builder.

use domain::base::Name;
use std::str::FromStr;

pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_REFUSED: u8 = 5;

const HEADER_LEN: usize = 12;

pub fn query_id(buf: &[u8]) -> Option<u16> {
    if buf.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([buf[0], buf[1]]))
}

pub fn question_count(buf: &[u8]) -> u16 {
    if buf.len() < HEADER_LEN {
        return 0;
    }
    u16::from_be_bytes([buf[4], buf[5]])
}

fn recursion_desired(buf: &[u8]) -> bool {
    buf.len() > 2 && (buf[2] & 0x01) != 0
}

/// Extracts and canonicalizes the first question's name, without following
/// compression pointers (none are legal in the question section, which is
/// always first in the message).
pub fn first_question_name(buf: &[u8]) -> Option<String> {
    if question_count(buf) == 0 || buf.len() <= HEADER_LEN {
        return None;
    }

    let mut labels = Vec::new();
    let mut pos = HEADER_LEN;

    loop {
        let len = *buf.get(pos)? as usize;
        if len == 0 {
            break;
        }
        if len & 0xC0 != 0 {
            // A compression pointer here would be malformed for a question.
            return None;
        }
        pos += 1;
        let label = buf.get(pos..pos + len)?;
        labels.push(String::from_utf8_lossy(label).to_string());
        pos += len;
    }

    let joined = labels.join(".");
    // Validate through the `domain` crate's name grammar; reject anything
    // that wouldn't round-trip as a legal DNS name.
    Name::<Vec<u8>>::from_str(&joined).ok()?;
    Some(joined)
}

/// Sets QR=1, AA=1, RCODE, zeroes AN/NS/AR counts, and keeps the original
/// ID + question section untouched — an authoritative synthetic reply that
/// mirrors the query.
pub fn build_reply(query: &[u8], rcode: u8) -> Vec<u8> {
    let qdcount = question_count(query);
    let keep_question = qdcount > 0 && query.len() > HEADER_LEN;

    let mut out = Vec::with_capacity(HEADER_LEN + if keep_question { query.len() - HEADER_LEN } else { 0 });
    out.extend_from_slice(&query[..2.min(query.len())]);
    while out.len() < 2 {
        out.push(0);
    }

    let rd = recursion_desired(query);
    let flags_hi = 0x80 | 0x04 /* AA */ | if rd { 0x01 } else { 0x00 };
    let flags_lo = rcode & 0x0F;
    out.push(flags_hi);
    out.push(flags_lo);

    let qd = if keep_question { qdcount } else { 0 };
    out.extend_from_slice(&qd.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    out.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    out.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

    if keep_question {
        out.extend_from_slice(&query[HEADER_LEN..]);
    }

    out
}

/// Rewrites the first two bytes of `response` to `id`, matching the query's
/// ID (required of every served message per SPEC_FULL §8).
pub fn rewrite_id(response: &mut [u8], id: u16) {
    if response.len() >= 2 {
        response[0..2].copy_from_slice(&id.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_for(name: &str) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = 0xAB;
        buf[1] = 0xCD;
        buf[2] = 0x01; // RD
        buf[4..6].copy_from_slice(&1u16.to_be_bytes());
        for label in name.split('.') {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
        buf.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
        buf.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN
        buf
    }

    #[test]
    fn extracts_question_name() {
        let q = query_for("video.ads.example.com");
        assert_eq!(first_question_name(&q).as_deref(), Some("video.ads.example.com"));
    }

    #[test]
    fn empty_question_count_zero() {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[4..6].copy_from_slice(&0u16.to_be_bytes());
        assert_eq!(question_count(&buf), 0);
        assert!(first_question_name(&buf).is_none());
    }

    #[test]
    fn build_reply_mirrors_id_and_sets_rcode() {
        let q = query_for("ads.example.com");
        let reply = build_reply(&q, RCODE_REFUSED);
        assert_eq!(query_id(&reply), query_id(&q));
        assert_eq!(reply[3] & 0x0F, RCODE_REFUSED);
        assert_eq!(reply[2] & 0x80, 0x80); // QR set
        assert_eq!(reply[2] & 0x04, 0x04); // AA set
    }

    #[test]
    fn rewrite_id_overwrites_leading_bytes() {
        let mut resp = vec![0u8, 0u8, 0x81, 0x80];
        rewrite_id(&mut resp, 0xBEEF);
        assert_eq!(query_id(&resp), Some(0xBEEF));
    }
}
