//! Linux errno values used in USB/IP status fields
//!
//! Status fields on the wire carry negated errnos; the constants here are the
//! positive values, negated at the point of use. The client side (vhci)
//! interprets them, so Linux numbering applies regardless of the host OS.

pub const EPIPE: i32 = 32;
pub const ETIME: i32 = 62;
pub const EPROTO: i32 = 71;
pub const EOVERFLOW: i32 = 75;
pub const EILSEQ: i32 = 84;
pub const ECONNRESET: i32 = 104;
pub const ETIMEDOUT: i32 = 110;
pub const EREMOTEIO: i32 = 121;
pub const ENODEV: i32 = 19;
