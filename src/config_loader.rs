use crate::config::FabricConfig;
use crate::device::SwitchSeed;
use color_eyre::Result;
use log::info;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// Load and validate a fabric file
pub fn load_config(config_path: &Path) -> Result<FabricConfig> {
    info!("Loading fabric configuration from: {:?}", config_path);

    let file = File::open(config_path)?;
    let config: FabricConfig = serde_yaml::from_reader(file)?;

    info!(
        "Fabric {} with {} switch(es) and {} cluster change(s)",
        config.settings.name,
        config.switches.len(),
        config.clusters.delete.len() + config.clusters.update.len() + config.clusters.create.len()
    );

    config.validate()?;

    Ok(config)
}

/// Load pre-existing switch state keyed by management IP
pub fn load_seed(seed_path: &Path) -> Result<BTreeMap<String, SwitchSeed>> {
    info!("Loading existing switch state from: {:?}", seed_path);

    let file = File::open(seed_path)?;
    let seed: BTreeMap<String, SwitchSeed> = serde_yaml::from_reader(file)?;

    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_fabric_config() {
        let yaml = r#"
settings:
  name: default
  fabric_type: NonClos
switches:
  - host: 10.25.0.1
    role: Rack
  - host: 10.25.0.2
    role: Rack
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.switches.len(), 2);
        assert_eq!(config.settings.name, "default");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let yaml = r#"
settings:
  name: ""
switches: []
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("fabric name cannot be empty"));
    }

    #[test]
    fn test_load_seed() {
        let yaml = r#"
10.24.0.3:
  overlay_gateway: OVG_FAIL
10.24.0.4:
  fail_login: true
  fail_operations: ["Persist Config"]
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let seed = load_seed(temp_file.path()).unwrap();
        assert_eq!(seed["10.24.0.3"].overlay_gateway.as_deref(), Some("OVG_FAIL"));
        assert!(seed["10.24.0.4"].fail_login);
    }
}
