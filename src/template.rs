//! consul-template source generation
//!
//! Turns a [`RoutingIntent`] into the frontend ACL rules and the backend
//! server pool, both written in consul-template syntax. A side with an
//! operator-supplied template file uses that file verbatim instead.

use std::fmt::Write as _;
use std::path::Path;

use crate::error::ReconfigureError;
use crate::intent::RoutingIntent;

/// Consul health filter passed to the `service` lookup
const SERVICE_FILTER: &str = "any";

/// Generate the (frontend, backend) template sources for one service.
///
/// Fails only when a custom template file cannot be read. In that case no
/// template is returned for either side.
pub fn generate(intent: &RoutingIntent) -> Result<(String, String), ReconfigureError> {
    let front = match &intent.consul_template_fe_path {
        Some(path) => read_template(path)?,
        None => frontend(intent),
    };
    let back = match &intent.consul_template_be_path {
        Some(path) => read_template(path)?,
        None => backend(intent),
    };
    Ok((front, back))
}

/// Generate and concatenate the templates of several services, in order
pub fn generate_all(intents: &[RoutingIntent]) -> Result<(String, String), ReconfigureError> {
    let mut fronts = Vec::with_capacity(intents.len());
    let mut backs = Vec::with_capacity(intents.len());
    for intent in intents {
        let (front, back) = generate(intent)?;
        fronts.push(front);
        backs.push(back);
    }
    Ok((fronts.join("\n"), backs.join("\n")))
}

fn read_template(path: &Path) -> Result<String, ReconfigureError> {
    std::fs::read_to_string(path).map_err(|source| ReconfigureError::TemplateRead {
        path: path.to_path_buf(),
        source,
    })
}

fn frontend(intent: &RoutingIntent) -> String {
    let name = &intent.service_name;
    let keyword = intent.path_type.as_keyword();

    let mut out = format!("\n    acl url_{}", name);
    for path in &intent.service_path {
        let _ = write!(out, " {} {}", keyword, path);
    }
    if let Some(domain) = intent.domain() {
        let _ = write!(out, "\n    acl domain_{} hdr_dom(host) -i {}", name, domain);
    }
    let _ = write!(
        out,
        "\n    use_backend {} if url_{}",
        intent.backend_name(),
        name
    );
    if intent.domain().is_some() {
        let _ = write!(out, " domain_{}", name);
    }
    out
}

fn backend(intent: &RoutingIntent) -> String {
    let check = if intent.skip_check { "" } else { " check" };
    format!(
        r#"backend {backend}
    {{{{range $i, $e := service "{lookup}" "{filter}"}}}}
    server {{{{$e.Node}}}}_{{{{$i}}}}_{{{{$e.Port}}}} {{{{$e.Address}}}}:{{{{$e.Port}}}}{check}
    {{{{end}}}}"#,
        backend = intent.backend_name(),
        lookup = intent.lookup_name(),
        filter = SERVICE_FILTER,
        check = check,
    )
}
