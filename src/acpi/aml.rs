//! AML encoding: a small term tree and a definition-block writer.
//!
//! Only the subset of AML that patch tables need is covered: scopes,
//! devices, methods, named data, externals, simple conditionals and
//! `_OSI` checks.

use super::tables::{byte_sum, HEADER_LEN};

pub const OEM_ID: &[u8; 6] = b"EFIFRG";
const CREATOR_ID: &[u8; 4] = b"INTL";
const CREATOR_REVISION: u32 = 0x2022_0331;
const OEM_REVISION: u32 = 0x0000_1000;

// Opcodes
const ZERO_OP: u8 = 0x00;
const ONE_OP: u8 = 0x01;
const NAME_OP: u8 = 0x08;
const BYTE_PREFIX: u8 = 0x0A;
const WORD_PREFIX: u8 = 0x0B;
const DWORD_PREFIX: u8 = 0x0C;
const STRING_PREFIX: u8 = 0x0D;
const QWORD_PREFIX: u8 = 0x0E;
const SCOPE_OP: u8 = 0x10;
const BUFFER_OP: u8 = 0x11;
const PACKAGE_OP: u8 = 0x12;
const METHOD_OP: u8 = 0x14;
const EXTERNAL_OP: u8 = 0x15;
const DUAL_NAME_PREFIX: u8 = 0x2E;
const MULTI_NAME_PREFIX: u8 = 0x2F;
const EXT_OP_PREFIX: u8 = 0x5B;
const DEVICE_OP: u8 = 0x82;
const PROCESSOR_OP: u8 = 0x83;
const ROOT_CHAR: u8 = b'\\';
const PARENT_PREFIX: u8 = b'^';
const LOCAL0_OP: u8 = 0x60;
const ARG0_OP: u8 = 0x68;
const STORE_OP: u8 = 0x70;
const LAND_OP: u8 = 0x90;
const LOR_OP: u8 = 0x91;
const LNOT_OP: u8 = 0x92;
const LEQUAL_OP: u8 = 0x93;
const IF_OP: u8 = 0xA0;
const ELSE_OP: u8 = 0xA1;
const RETURN_OP: u8 = 0xA4;
const ONES_OP: u8 = 0xFF;

/// Object types for `External`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Any = 0x00,
    Integer = 0x01,
    Device = 0x06,
    Method = 0x08,
    Processor = 0x0C,
}

/// Data objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    Int(u64),
    Ones,
    Str(String),
    EisaId(String),
    Buffer(Vec<u8>),
    Package(Vec<Data>),
}

/// Expressions usable as predicates, operands and return values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Data(Data),
    /// Reference to a named object, evaluated in place.
    Ref(String),
    /// Method invocation.
    Call(String, Vec<Expr>),
    Local(u8),
    Arg(u8),
    Not(Box<Expr>),
    Equal(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn int(value: u64) -> Expr {
        Expr::Data(Data::Int(value))
    }

    pub fn string(value: &str) -> Expr {
        Expr::Data(Data::Str(value.to_string()))
    }

    /// `_OSI ("Darwin")`
    pub fn is_darwin() -> Expr {
        Expr::Call("_OSI".to_string(), vec![Expr::string("Darwin")])
    }

    pub fn not(inner: Expr) -> Expr {
        Expr::Not(Box::new(inner))
    }

    pub fn equal(a: Expr, b: Expr) -> Expr {
        Expr::Equal(Box::new(a), Box::new(b))
    }

    pub fn and(a: Expr, b: Expr) -> Expr {
        Expr::And(Box::new(a), Box::new(b))
    }

    pub fn or(a: Expr, b: Expr) -> Expr {
        Expr::Or(Box::new(a), Box::new(b))
    }
}

/// Statements and declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    External(String, ObjectType, u8),
    Scope(String, Vec<Term>),
    Device(String, Vec<Term>),
    Method {
        name: String,
        args: u8,
        serialized: bool,
        body: Vec<Term>,
    },
    /// Legacy `Processor (name, id, 0, 0)` declaration.
    Processor(String, u8, Vec<Term>),
    Name(String, Data),
    If(Expr, Vec<Term>),
    Else(Vec<Term>),
    Store(Expr, Expr),
    Return(Expr),
    /// An expression evaluated for its side effects, e.g. a method call.
    Eval(Expr),
}

impl Term {
    pub fn method(name: &str, args: u8, body: Vec<Term>) -> Term {
        Term::Method {
            name: name.to_string(),
            args,
            serialized: false,
            body,
        }
    }

    pub fn name(name: &str, data: Data) -> Term {
        Term::Name(name.to_string(), data)
    }

    pub fn scope(path: &str, body: Vec<Term>) -> Term {
        Term::Scope(path.to_string(), body)
    }

    pub fn device(name: &str, body: Vec<Term>) -> Term {
        Term::Device(name.to_string(), body)
    }

    pub fn external(path: &str, kind: ObjectType) -> Term {
        Term::External(path.to_string(), kind, 0)
    }

    /// `Method (_STA) { If (_OSI ("Darwin")) { Return (present) } Else { Return (absent) } }`
    pub fn darwin_sta(present: u64, absent: u64) -> Term {
        Term::method(
            "_STA",
            0,
            vec![
                Term::If(Expr::is_darwin(), vec![Term::Return(Expr::int(present))]),
                Term::Else(vec![Term::Return(Expr::int(absent))]),
            ],
        )
    }
}

/// Encode a package length for a payload of `content_len` bytes.
///
/// The encoded length counts itself.
pub fn encode_pkg_length(content_len: usize) -> Vec<u8> {
    let (size, total) = if content_len + 1 <= 0x3F {
        (1, content_len + 1)
    } else if content_len + 2 <= 0x0FFF {
        (2, content_len + 2)
    } else if content_len + 3 <= 0x0F_FFFF {
        (3, content_len + 3)
    } else {
        (4, content_len + 4)
    };
    if size == 1 {
        return vec![total as u8];
    }
    let mut out = vec![(((size - 1) as u8) << 6) | (total & 0x0F) as u8];
    let mut rest = total >> 4;
    for _ in 1..size {
        out.push((rest & 0xFF) as u8);
        rest >>= 8;
    }
    out
}

/// Decode a package length at `bytes[0]`. Returns `(length, bytes used)`.
pub fn decode_pkg_length(bytes: &[u8]) -> Option<(usize, usize)> {
    let lead = *bytes.first()?;
    let follow = (lead >> 6) as usize;
    if follow == 0 {
        return Some(((lead & 0x3F) as usize, 1));
    }
    if bytes.len() < 1 + follow || lead & 0x30 != 0 {
        return None;
    }
    let mut length = (lead & 0x0F) as usize;
    for (i, b) in bytes[1..=follow].iter().enumerate() {
        length |= (*b as usize) << (4 + 8 * i);
    }
    Some((length, 1 + follow))
}

fn pad_seg(seg: &str) -> [u8; 4] {
    let mut out = [b'_'; 4];
    for (i, b) in seg.bytes().take(4).enumerate() {
        out[i] = b.to_ascii_uppercase();
    }
    out
}

/// Encode a name path such as `\_SB.PCI0.LPCB`, `^^PCI0` or `_STA`.
pub fn encode_name(path: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = path;
    if let Some(stripped) = rest.strip_prefix('\\') {
        out.push(ROOT_CHAR);
        rest = stripped;
    }
    while let Some(stripped) = rest.strip_prefix('^') {
        out.push(PARENT_PREFIX);
        rest = stripped;
    }
    let segs: Vec<&str> = rest.split('.').filter(|s| !s.is_empty()).collect();
    match segs.len() {
        0 => out.push(ZERO_OP),
        1 => {}
        2 => out.push(DUAL_NAME_PREFIX),
        n => {
            out.push(MULTI_NAME_PREFIX);
            out.push(n as u8);
        }
    }
    for seg in segs {
        out.extend_from_slice(&pad_seg(seg));
    }
    out
}

/// Compress a seven character EISA id (`PNP0C09`) into its integer form.
pub fn eisa_id(id: &str) -> u32 {
    let bytes = id.as_bytes();
    if bytes.len() != 7 {
        return 0;
    }
    let letter = |c: u8| ((c.to_ascii_uppercase().wrapping_sub(0x40)) & 0x1F) as u16;
    let vendor = (letter(bytes[0]) << 10) | (letter(bytes[1]) << 5) | letter(bytes[2]);
    let product = u16::from_str_radix(&id[3..7], 16).unwrap_or(0);
    let [v0, v1] = vendor.to_be_bytes();
    let [p0, p1] = product.to_be_bytes();
    u32::from_le_bytes([v0, v1, p0, p1])
}

/// Expand a compressed EISA id.
pub fn decode_eisa_id(value: u32) -> String {
    let b = value.to_le_bytes();
    let vendor = u16::from_be_bytes([b[0], b[1]]);
    let letter = |shift: u16| (((vendor >> shift) & 0x1F) as u8 + 0x40) as char;
    format!("{}{}{}{:02X}{:02X}", letter(10), letter(5), letter(0), b[2], b[3])
}

fn encode_int(value: u64, out: &mut Vec<u8>) {
    match value {
        0 => out.push(ZERO_OP),
        1 => out.push(ONE_OP),
        v if v <= 0xFF => out.extend_from_slice(&[BYTE_PREFIX, v as u8]),
        v if v <= 0xFFFF => {
            out.push(WORD_PREFIX);
            out.extend_from_slice(&(v as u16).to_le_bytes());
        }
        v if v <= 0xFFFF_FFFF => {
            out.push(DWORD_PREFIX);
            out.extend_from_slice(&(v as u32).to_le_bytes());
        }
        v => {
            out.push(QWORD_PREFIX);
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
}

fn with_pkg_length(op: &[u8], content: Vec<u8>, out: &mut Vec<u8>) {
    out.extend_from_slice(op);
    out.extend(encode_pkg_length(content.len()));
    out.extend(content);
}

fn encode_data(data: &Data, out: &mut Vec<u8>) {
    match data {
        Data::Int(v) => encode_int(*v, out),
        Data::Ones => out.push(ONES_OP),
        Data::Str(s) => {
            out.push(STRING_PREFIX);
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        Data::EisaId(id) => {
            out.push(DWORD_PREFIX);
            out.extend_from_slice(&eisa_id(id).to_le_bytes());
        }
        Data::Buffer(bytes) => {
            let mut content = Vec::new();
            encode_int(bytes.len() as u64, &mut content);
            content.extend_from_slice(bytes);
            with_pkg_length(&[BUFFER_OP], content, out);
        }
        Data::Package(items) => {
            let mut content = vec![items.len() as u8];
            for item in items {
                encode_data(item, &mut content);
            }
            with_pkg_length(&[PACKAGE_OP], content, out);
        }
    }
}

fn encode_expr(expr: &Expr, out: &mut Vec<u8>) {
    match expr {
        Expr::Data(d) => encode_data(d, out),
        Expr::Ref(path) => out.extend(encode_name(path)),
        Expr::Call(path, args) => {
            out.extend(encode_name(path));
            for arg in args {
                encode_expr(arg, out);
            }
        }
        Expr::Local(n) => out.push(LOCAL0_OP + (*n).min(7)),
        Expr::Arg(n) => out.push(ARG0_OP + (*n).min(6)),
        Expr::Not(inner) => {
            out.push(LNOT_OP);
            encode_expr(inner, out);
        }
        Expr::Equal(a, b) => {
            out.push(LEQUAL_OP);
            encode_expr(a, out);
            encode_expr(b, out);
        }
        Expr::And(a, b) => {
            out.push(LAND_OP);
            encode_expr(a, out);
            encode_expr(b, out);
        }
        Expr::Or(a, b) => {
            out.push(LOR_OP);
            encode_expr(a, out);
            encode_expr(b, out);
        }
    }
}

fn encode_term(term: &Term, out: &mut Vec<u8>) {
    match term {
        Term::External(path, kind, args) => {
            out.push(EXTERNAL_OP);
            out.extend(encode_name(path));
            out.push(*kind as u8);
            out.push(*args);
        }
        Term::Scope(path, body) => {
            let mut content = encode_name(path);
            content.extend(encode_terms(body));
            with_pkg_length(&[SCOPE_OP], content, out);
        }
        Term::Device(name, body) => {
            let mut content = encode_name(name);
            content.extend(encode_terms(body));
            with_pkg_length(&[EXT_OP_PREFIX, DEVICE_OP], content, out);
        }
        Term::Method {
            name,
            args,
            serialized,
            body,
        } => {
            let mut content = encode_name(name);
            content.push((args & 0x07) | if *serialized { 0x08 } else { 0 });
            content.extend(encode_terms(body));
            with_pkg_length(&[METHOD_OP], content, out);
        }
        Term::Processor(name, id, body) => {
            let mut content = encode_name(name);
            content.push(*id);
            content.extend_from_slice(&[0, 0, 0, 0, 0]);
            content.extend(encode_terms(body));
            with_pkg_length(&[EXT_OP_PREFIX, PROCESSOR_OP], content, out);
        }
        Term::Name(name, data) => {
            out.push(NAME_OP);
            out.extend(encode_name(name));
            encode_data(data, out);
        }
        Term::If(predicate, body) => {
            let mut content = Vec::new();
            encode_expr(predicate, &mut content);
            content.extend(encode_terms(body));
            with_pkg_length(&[IF_OP], content, out);
        }
        Term::Else(body) => with_pkg_length(&[ELSE_OP], encode_terms(body), out),
        Term::Store(value, target) => {
            out.push(STORE_OP);
            encode_expr(value, out);
            encode_expr(target, out);
        }
        Term::Return(value) => {
            out.push(RETURN_OP);
            encode_expr(value, out);
        }
        Term::Eval(value) => encode_expr(value, out),
    }
}

pub fn encode_terms(terms: &[Term]) -> Vec<u8> {
    let mut out = Vec::new();
    for term in terms {
        encode_term(term, &mut out);
    }
    out
}

/// Wrap an AML body in a table header with a valid checksum.
pub fn definition_block(signature: &[u8; 4], table_id: &str, body: &[u8]) -> Vec<u8> {
    let length = (HEADER_LEN + body.len()) as u32;
    let mut out = Vec::with_capacity(length as usize);
    out.extend_from_slice(signature);
    out.extend_from_slice(&length.to_le_bytes());
    out.push(2);
    out.push(0);
    out.extend_from_slice(OEM_ID);
    let mut table = [b' '; 8];
    for (i, b) in table_id.bytes().take(8).enumerate() {
        table[i] = b;
    }
    out.extend_from_slice(&table);
    out.extend_from_slice(&OEM_REVISION.to_le_bytes());
    out.extend_from_slice(CREATOR_ID);
    out.extend_from_slice(&CREATOR_REVISION.to_le_bytes());
    out.extend_from_slice(body);
    out[9] = 0u8.wrapping_sub(byte_sum(&out));
    out
}

/// Build a complete SSDT from a term list.
pub fn ssdt(table_id: &str, terms: &[Term]) -> Vec<u8> {
    definition_block(b"SSDT", table_id, &encode_terms(terms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkg_length_encoding() {
        assert_eq!(encode_pkg_length(0x10), vec![0x11]);
        assert_eq!(encode_pkg_length(0x3E), vec![0x3F]);
        assert_eq!(encode_pkg_length(0x3F), vec![0x41, 0x04]);
        let encoded = encode_pkg_length(0x1234);
        assert_eq!(decode_pkg_length(&encoded), Some((0x1234 + encoded.len(), encoded.len())));
    }

    #[test]
    fn test_name_encoding() {
        assert_eq!(encode_name("_STA"), b"_STA".to_vec());
        assert_eq!(encode_name("\\_SB.PCI0"), b"\\\x2e_SB_PCI0".to_vec());
        assert_eq!(encode_name("\\_SB.PCI0.LPCB"), b"\\\x2f\x03_SB_PCI0LPCB".to_vec());
        assert_eq!(encode_name("^EC"), b"^EC__".to_vec());
    }

    #[test]
    fn test_eisa_id() {
        assert_eq!(eisa_id("PNP0C09"), 0x090C_D041);
        assert_eq!(decode_eisa_id(0x090C_D041), "PNP0C09");
        assert_eq!(decode_eisa_id(eisa_id("APP0008")), "APP0008");
    }

    #[test]
    fn test_ssdt_checksum_and_header() {
        let table = ssdt(
            "EC",
            &[Term::scope(
                "\\_SB",
                vec![Term::device("EC", vec![Term::name("_HID", Data::Str("ACID0001".into())), Term::darwin_sta(0x0F, 0)])],
            )],
        );
        assert_eq!(&table[0..4], b"SSDT");
        assert_eq!(byte_sum(&table), 0);
        assert_eq!(u32::from_le_bytes([table[4], table[5], table[6], table[7]]) as usize, table.len());
        assert_eq!(&table[10..16], OEM_ID);
    }

    #[test]
    fn test_integer_forms() {
        let mut out = Vec::new();
        encode_int(0x1F0000, &mut out);
        assert_eq!(out, vec![DWORD_PREFIX, 0x00, 0x00, 0x1F, 0x00]);
    }
}
