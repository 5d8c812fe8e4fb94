//! XML rendering for the query-protocol responses.
//!
//! Responses follow the 2015-12-01 envelope:
//! `<OpResponse xmlns=...><OpResult>...</OpResult>
//! <ResponseMetadata><RequestId>...</RequestId></ResponseMetadata></OpResponse>`.
//! Result bodies are rendered generically from JSON values whose fields
//! already carry the PascalCase wire names; arrays become `<member>` lists.

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

pub const ELBV2_XMLNS: &str = "http://elasticloadbalancing.amazonaws.com/doc/2015-12-01/";

pub fn response_envelope(action: &str, result: &serde_json::Value, request_id: &str) -> String {
    let mut writer = Writer::new(Vec::new());
    let response_tag = format!("{}Response", action);
    let result_tag = format!("{}Result", action);

    let mut root = BytesStart::new(response_tag.as_str());
    root.push_attribute(("xmlns", ELBV2_XMLNS));
    write(&mut writer, Event::Start(root));

    write(
        &mut writer,
        Event::Start(BytesStart::new(result_tag.as_str())),
    );
    if let serde_json::Value::Object(fields) = result {
        for (key, value) in fields {
            value_to_xml(&mut writer, key, value);
        }
    }
    write(&mut writer, Event::End(BytesEnd::new(result_tag.as_str())));

    write_request_metadata(&mut writer, request_id);
    write(&mut writer, Event::End(BytesEnd::new(response_tag.as_str())));
    finish(writer)
}

pub fn error_envelope(code: &str, message: &str, request_id: &str) -> String {
    let mut writer = Writer::new(Vec::new());
    let mut root = BytesStart::new("ErrorResponse");
    root.push_attribute(("xmlns", ELBV2_XMLNS));
    write(&mut writer, Event::Start(root));

    write(&mut writer, Event::Start(BytesStart::new("Error")));
    text_element(&mut writer, "Type", "Sender");
    text_element(&mut writer, "Code", code);
    text_element(&mut writer, "Message", message);
    write(&mut writer, Event::End(BytesEnd::new("Error")));

    text_element(&mut writer, "RequestId", request_id);
    write(&mut writer, Event::End(BytesEnd::new("ErrorResponse")));
    finish(writer)
}

fn write_request_metadata(writer: &mut Writer<Vec<u8>>, request_id: &str) {
    write(writer, Event::Start(BytesStart::new("ResponseMetadata")));
    text_element(writer, "RequestId", request_id);
    write(writer, Event::End(BytesEnd::new("ResponseMetadata")));
}

fn value_to_xml(writer: &mut Writer<Vec<u8>>, name: &str, value: &serde_json::Value) {
    match value {
        serde_json::Value::Null => {}
        serde_json::Value::Object(fields) => {
            write(writer, Event::Start(BytesStart::new(name)));
            for (key, child) in fields {
                value_to_xml(writer, key, child);
            }
            write(writer, Event::End(BytesEnd::new(name)));
        }
        serde_json::Value::Array(items) => {
            write(writer, Event::Start(BytesStart::new(name)));
            for item in items {
                value_to_xml(writer, "member", item);
            }
            write(writer, Event::End(BytesEnd::new(name)));
        }
        serde_json::Value::String(s) => text_element(writer, name, s),
        other => text_element(writer, name, &other.to_string()),
    }
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) {
    write(writer, Event::Start(BytesStart::new(name)));
    write(writer, Event::Text(BytesText::new(value)));
    write(writer, Event::End(BytesEnd::new(name)));
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) {
    // Writing into a Vec cannot fail.
    let _ = writer.write_event(event);
}

fn finish(writer: Writer<Vec<u8>>) -> String {
    String::from_utf8(writer.into_inner()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_envelope_shape() {
        let xml = response_envelope(
            "CreateLoadBalancer",
            &json!({"LoadBalancers": [{"LoadBalancerName": "web"}]}),
            "req-1",
        );
        assert!(xml.starts_with(
            "<CreateLoadBalancerResponse xmlns=\"http://elasticloadbalancing.amazonaws.com/doc/2015-12-01/\">"
        ));
        assert!(xml.contains("<CreateLoadBalancerResult>"));
        assert!(xml.contains("<LoadBalancers><member><LoadBalancerName>web</LoadBalancerName></member></LoadBalancers>"));
        assert!(xml.contains("<ResponseMetadata><RequestId>req-1</RequestId></ResponseMetadata>"));
    }

    #[test]
    fn test_text_is_escaped() {
        let xml = response_envelope("DescribeTags", &json!({"Value": "a<b&c"}), "req");
        assert!(xml.contains("<Value>a&lt;b&amp;c</Value>"));
    }

    #[test]
    fn test_error_envelope_shape() {
        let xml = error_envelope("DuplicateLoadBalancerName", "web already exists", "req-2");
        assert!(xml.contains("<Type>Sender</Type>"));
        assert!(xml.contains("<Code>DuplicateLoadBalancerName</Code>"));
        assert!(xml.contains("<RequestId>req-2</RequestId>"));
    }
}
