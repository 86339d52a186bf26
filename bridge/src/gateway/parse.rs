//! Turns an incoming HTTP method, path and query string into the verb,
//! resource, namespace and name a kubectl-compatible client meant.

use bridge_common::k8s::{ParsedRequest, Verb};
use bridge_common::status::{ErrorKind, KubeStatus};
use std::collections::HashMap;

/// `/api/v1/namespaces/{ns}/{resource}[/{name}]` or the cluster-scoped
/// `/apis/{group}/{version}/{resource}[/{name}]` form without a namespace
/// segment, which this gateway treats as the `default` namespace.
pub fn parse_path(
    http_method: &str,
    path: &str,
    query: &HashMap<String, String>,
    body: Vec<u8>,
) -> Result<ParsedRequest, KubeStatus> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    let ns_index = segments.iter().position(|s| *s == "namespaces");
    let (namespace, rest) = match ns_index {
        Some(idx) => {
            let ns = segments
                .get(idx + 1)
                .ok_or_else(|| KubeStatus::failure(ErrorKind::BadRequest, "malformed path: missing namespace segment"))?;
            (ns.to_string(), &segments[idx + 2..])
        }
        None => ("default".to_string(), &segments[..]),
    };

    let resource = rest
        .first()
        .ok_or_else(|| KubeStatus::failure(ErrorKind::BadRequest, "malformed path: missing resource type"))?
        .to_string();
    let name = rest.get(1).map(|s| s.to_string());

    let sub_action = rest.get(2).copied();
    let verb = verb_for(http_method, query, sub_action, name.is_some())
        .ok_or_else(|| KubeStatus::failure(ErrorKind::BadRequest, format!("unsupported method {http_method}")))?;

    Ok(ParsedRequest { verb, resource, namespace, name, options: query.clone(), payload: body })
}

fn verb_for(http_method: &str, query: &HashMap<String, String>, sub_action: Option<&str>, has_name: bool) -> Option<Verb> {
    if sub_action == Some("log") {
        return Some(Verb::Logs);
    }
    if sub_action == Some("exec") {
        return Some(Verb::Exec);
    }

    match http_method.to_ascii_uppercase().as_str() {
        "GET" if query.contains_key("watch") => Some(Verb::Watch),
        "GET" if has_name => Some(Verb::Get),
        "GET" => Some(Verb::List),
        "POST" if query.get("fieldManager").is_some() => Some(Verb::Apply),
        "POST" => Some(Verb::Create),
        "PUT" => Some(Verb::Update),
        "PATCH" => Some(Verb::Patch),
        "DELETE" => Some(Verb::Delete),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn get_list_has_no_name() {
        let parsed = parse_path("GET", "/api/v1/namespaces/default/pods", &q(&[]), vec![]).unwrap();
        assert_eq!(parsed.verb, Verb::List);
        assert_eq!(parsed.resource, "pods");
        assert_eq!(parsed.namespace, "default");
        assert!(parsed.name.is_none());
    }

    #[test]
    fn get_single_resource_by_name() {
        let parsed = parse_path("GET", "/api/v1/namespaces/prod/pods/web-0", &q(&[]), vec![]).unwrap();
        assert_eq!(parsed.verb, Verb::Get);
        assert_eq!(parsed.name, Some("web-0".to_string()));
    }

    #[test]
    fn missing_namespace_segment_defaults_to_default() {
        let parsed = parse_path("GET", "/apis/apps/v1/deployments", &q(&[]), vec![]).unwrap();
        assert_eq!(parsed.namespace, "default");
    }

    #[test]
    fn watch_query_param_selects_watch_verb() {
        let parsed = parse_path("GET", "/api/v1/namespaces/default/pods", &q(&[("watch", "true")]), vec![]).unwrap();
        assert_eq!(parsed.verb, Verb::Watch);
    }

    #[test]
    fn logs_subpath_selects_logs_verb() {
        let parsed = parse_path("GET", "/api/v1/namespaces/default/pods/web-0/log", &q(&[]), vec![]).unwrap();
        assert_eq!(parsed.verb, Verb::Logs);
    }

    #[test]
    fn unsupported_method_is_a_bad_request() {
        assert!(parse_path("OPTIONS", "/api/v1/namespaces/default/pods", &q(&[]), vec![]).is_err());
    }
}
