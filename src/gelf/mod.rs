//! GELF (Graylog Extended Log Format) envelope decoding, and the TCP/UDP
//! transports that speak it.

pub mod decoder;
pub mod tcp;
pub mod udp;

pub use decoder::{decode, to_text_line, GelfEnvelope, GelfError};
