use crate::common::*;
use retina_dl::config::Config as DetectorConfig;

pub static CONFIG_VERSION: Lazy<VersionReq> = Lazy::new(|| VersionReq::parse("0.1.0").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_version")]
    pub version: Version,
    /// The detector options.
    pub detector: DetectorConfig,
    /// The number of records per generated target batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let config: Self = json5::from_str(&text)?;
        ensure!(config.batch_size > 0, "batch_size must be positive");
        Ok(config)
    }
}

fn default_batch_size() -> usize {
    8
}

pub fn deserialize_version<'de, D>(deserializer: D) -> Result<Version, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    let version = Version::parse(&text).map_err(|err| {
        D::Error::custom(format!(
            "failed to parse version number '{}': {:?}",
            text, err
        ))
    })?;

    if !CONFIG_VERSION.matches(&version) {
        return Err(D::Error::custom(format!(
            "incompatible version: get '{}', but it is incompatible with requirement '{}'",
            version, &*CONFIG_VERSION,
        )));
    }

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_sample_config() -> Result<()> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("retina.json5");
        let config = Config::open(path)?;
        assert_eq!(config.detector.num_classes.get(), 80);
        assert_eq!(config.batch_size, 4);
        Ok(())
    }

    #[test]
    fn incompatible_version_is_rejected() {
        let text = "{ version: '0.2.0', detector: { num_classes: 3 } }";
        assert!(json5::from_str::<Config>(text).is_err());

        let text = "{ version: '0.1.3', detector: { num_classes: 3 } }";
        let config: Config = json5::from_str(text).unwrap();
        assert_eq!(config.batch_size, 8);
    }
}
