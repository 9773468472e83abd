//! Flow loading — built-in code-declared flows plus a YAML directory.
//!
//! YAML files let operators iterate on dialogs without a deploy. Files
//! are parsed here and validated by [`crate::validate`] before the
//! catalog registers anything.

use std::path::Path;

use pv_domain::{Error, Result};

use crate::builtin;
use crate::model::FlowDefinition;

/// Parse a single YAML flow document.
pub fn parse_yaml_flow(source: &str) -> Result<FlowDefinition> {
    serde_yaml::from_str(source).map_err(|e| Error::Flow(format!("YAML flow parse: {e}")))
}

/// Load every `.yaml` / `.yml` file in a directory as a flow definition.
/// A missing directory is an error (config pointed somewhere wrong); an
/// empty one is fine.
pub fn load_yaml_dir(dir: &Path) -> Result<Vec<FlowDefinition>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::Flow(format!("flow dir {}: {e}", dir.display())))?;

    let mut flows = Vec::new();
    for entry in entries {
        let path = entry.map_err(Error::Io)?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);
        if !is_yaml {
            continue;
        }
        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let flow = parse_yaml_flow(&raw)
            .map_err(|e| Error::Flow(format!("{}: {e}", path.display())))?;
        tracing::info!(flow_id = %flow.id, path = %path.display(), "loaded YAML flow");
        flows.push(flow);
    }
    Ok(flows)
}

/// All flows known at boot: built-ins first, then the YAML directory.
/// A YAML flow with the same `(id, version)` as a built-in replaces it.
pub fn load_all(yaml_dir: Option<&Path>) -> Result<Vec<FlowDefinition>> {
    let mut flows = builtin::all();
    if let Some(dir) = yaml_dir {
        for yaml_flow in load_yaml_dir(dir)? {
            if let Some(slot) = flows
                .iter_mut()
                .find(|f| f.id == yaml_flow.id && f.version == yaml_flow.version)
            {
                tracing::info!(flow_id = %yaml_flow.id, "YAML flow overrides built-in");
                *slot = yaml_flow;
            } else {
                flows.push(yaml_flow);
            }
        }
    }
    Ok(flows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PING_FLOW: &str = r#"
id: ping_v1
name: Ping
module: general
trigger: ping
initial_state: hello
final_states: [hello]
states:
  hello:
    type: end
    actions:
      - executor: response
        config:
          message: "pong"
"#;

    #[test]
    fn yaml_round_trip_preserves_the_definition() {
        let flow = parse_yaml_flow(PING_FLOW).unwrap();
        let saved = serde_yaml::to_string(&flow).unwrap();
        let reloaded = parse_yaml_flow(&saved).unwrap();
        assert_eq!(
            serde_json::to_value(&flow).unwrap(),
            serde_json::to_value(&reloaded).unwrap()
        );
    }

    #[test]
    fn dir_loading_skips_non_yaml_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ping.yaml"), PING_FLOW).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a flow").unwrap();

        let flows = load_yaml_dir(dir.path()).unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].id, "ping_v1");
    }

    #[test]
    fn broken_yaml_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("bad.yaml")).unwrap();
        writeln!(f, "id: [unclosed").unwrap();
        assert!(load_yaml_dir(dir.path()).is_err());
    }

    #[test]
    fn yaml_flow_overrides_builtin_with_same_id_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let builtin_count = crate::builtin::all().len();

        // An override for the built-in tracking flow.
        let tracking = crate::builtin::all()
            .into_iter()
            .find(|f| f.id == crate::builtin::TRACKING_FLOW_ID)
            .unwrap();
        let mut doc = serde_yaml::to_value(&tracking).unwrap();
        doc["name"] = serde_yaml::Value::String("Overridden".into());
        std::fs::write(
            dir.path().join("tracking.yaml"),
            serde_yaml::to_string(&doc).unwrap(),
        )
        .unwrap();

        let flows = load_all(Some(dir.path())).unwrap();
        assert_eq!(flows.len(), builtin_count);
        let replaced = flows
            .iter()
            .find(|f| f.id == crate::builtin::TRACKING_FLOW_ID)
            .unwrap();
        assert_eq!(replaced.name, "Overridden");
    }
}
