//! Query-protocol body decoding.
//!
//! The ELBv2 wire flattens arrays as `<Param>.member.<N>` and nested
//! objects with dotted paths. Member enumeration starts at 1 and stops at
//! the first gap.

use std::collections::HashMap;

/// Flattened key/value pairs from a form-urlencoded body.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    values: HashMap<String, String>,
}

impl QueryParams {
    pub fn parse(body: &[u8]) -> Self {
        let values = form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(String::from)
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Scalar list: `key.member.1`, `key.member.2`, ... until the first gap.
    pub fn members(&self, key: &str) -> Vec<String> {
        let mut out = Vec::new();
        for n in 1.. {
            match self.get(&format!("{}.member.{}", key, n)) {
                Some(value) => out.push(value.to_string()),
                None => break,
            }
        }
        out
    }

    /// Object list: every `key.member.<N>.<rest>` grouped by N, the rest of
    /// the path preserved as the sub-key.
    pub fn member_objects(&self, key: &str) -> Vec<QueryParams> {
        let mut out = Vec::new();
        for n in 1.. {
            let prefix = format!("{}.member.{}.", key, n);
            let values: HashMap<String, String> = self
                .values
                .iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix(&prefix)
                        .map(|rest| (rest.to_string(), v.clone()))
                })
                .collect();
            if values.is_empty() {
                break;
            }
            out.push(QueryParams { values });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(body: &str) -> QueryParams {
        QueryParams::parse(body.as_bytes())
    }

    #[test]
    fn test_scalars_and_members() {
        let p = params(
            "Action=CreateLoadBalancer&Name=web&Subnets.member.1=subnet-a&Subnets.member.2=subnet-b",
        );
        assert_eq!(p.get("Action"), Some("CreateLoadBalancer"));
        assert_eq!(p.get("Name"), Some("web"));
        assert_eq!(p.members("Subnets"), vec!["subnet-a", "subnet-b"]);
        assert!(p.members("SecurityGroups").is_empty());
    }

    #[test]
    fn test_member_enumeration_stops_at_gap() {
        let p = params("Subnets.member.1=a&Subnets.member.3=c");
        assert_eq!(p.members("Subnets"), vec!["a"]);
    }

    #[test]
    fn test_member_objects_with_nested_paths() {
        let p = params(
            "Actions.member.1.Type=forward&Actions.member.1.TargetGroupArn=arn:tg\
             &Actions.member.2.Type=redirect",
        );
        let actions = p.member_objects("Actions");
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].get("Type"), Some("forward"));
        assert_eq!(actions[0].get("TargetGroupArn"), Some("arn:tg"));
        assert_eq!(actions[1].get("Type"), Some("redirect"));
    }

    #[test]
    fn test_url_decoding() {
        let p = params("Name=my%2Dlb&Scheme=internet%2Dfacing");
        assert_eq!(p.get("Name"), Some("my-lb"));
    }
}
