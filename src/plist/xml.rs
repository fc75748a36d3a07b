//! XML property-list writer.
//!
//! Output is byte-stable: keys come out in map order, indentation is one tab
//! per level and line endings are `\n`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt::Write;

use super::Value;

const HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
<plist version=\"1.0\">\n";

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Bool(true) => {
            indent(out, depth);
            out.push_str("<true/>\n");
        }
        Value::Bool(false) => {
            indent(out, depth);
            out.push_str("<false/>\n");
        }
        Value::Integer(i) => {
            indent(out, depth);
            let _ = writeln!(out, "<integer>{}</integer>", i);
        }
        Value::String(s) => {
            indent(out, depth);
            let _ = writeln!(out, "<string>{}</string>", escape(s));
        }
        Value::Data(d) => {
            indent(out, depth);
            let _ = writeln!(out, "<data>{}</data>", BASE64.encode(&d.bytes));
        }
        Value::Array(items) if items.is_empty() => {
            indent(out, depth);
            out.push_str("<array/>\n");
        }
        Value::Array(items) => {
            indent(out, depth);
            out.push_str("<array>\n");
            for item in items {
                write_value(out, item, depth + 1);
            }
            indent(out, depth);
            out.push_str("</array>\n");
        }
        Value::Dict(map) if map.is_empty() => {
            indent(out, depth);
            out.push_str("<dict/>\n");
        }
        Value::Dict(map) => {
            indent(out, depth);
            out.push_str("<dict>\n");
            for (key, item) in map {
                indent(out, depth + 1);
                let _ = writeln!(out, "<key>{}</key>", escape(key));
                write_value(out, item, depth + 1);
            }
            indent(out, depth);
            out.push_str("</dict>\n");
        }
    }
}

/// Serialize a value as an XML property list.
pub fn to_xml(value: &Value) -> String {
    let mut out = String::from(HEADER);
    write_value(&mut out, value, 0);
    out.push_str("</plist>\n");
    out
}

/// Minimal reader for flat `Info.plist` files: returns the string value that
/// follows `<key>{key}</key>` at any depth.
pub fn find_string(xml: &str, key: &str) -> Option<String> {
    let marker = format!("<key>{}</key>", key);
    let start = xml.find(&marker)? + marker.len();
    let rest = xml[start..].trim_start();
    let rest = rest.strip_prefix("<string>")?;
    let end = rest.find("</string>")?;
    Some(
        rest[..end]
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_shape() {
        let value = Value::from_pairs([
            ("Name", Value::from("A & B")),
            ("Empty", Value::Array(Vec::new())),
            ("Blob", Value::data(vec![0x07, 0x00, 0x9B, 0x3E])),
            ("On", Value::Bool(true)),
        ]);
        let xml = to_xml(&value);
        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("\t<key>Blob</key>\n\t<data>BwCbPg==</data>\n"));
        assert!(xml.contains("<string>A &amp; B</string>"));
        assert!(xml.contains("<array/>"));
        assert!(xml.ends_with("</dict>\n</plist>\n"));
        // BTreeMap ordering: Blob < Empty < Name < On
        let blob = xml.find("Blob").unwrap();
        let on = xml.find("<key>On").unwrap();
        assert!(blob < on);
    }

    #[test]
    fn test_find_string() {
        let xml = "<dict>\n\t<key>CFBundleExecutable</key>\n\t<string>Lilu</string>\n</dict>";
        assert_eq!(find_string(xml, "CFBundleExecutable"), Some("Lilu".to_string()));
        assert_eq!(find_string(xml, "CFBundleIdentifier"), None);
    }
}
