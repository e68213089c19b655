//! Named post-processing layers and their constructors.

use crate::{coder::BoxCoder, common::*, config::Config, inference::Stage};

/// The built-in layer names.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumString,
    EnumIter,
    strum::Display,
    Serialize,
    Deserialize,
)]
pub enum LayerKind {
    Anchors,
    RegressBoxes,
    ClipBoxes,
    FilterDetections,
}

/// The layer order of the standard detection pipeline.
pub const DEFAULT_LAYERS: [LayerKind; 4] = [
    LayerKind::Anchors,
    LayerKind::RegressBoxes,
    LayerKind::ClipBoxes,
    LayerKind::FilterDetections,
];

/// Builds a stage from the detector configuration.
pub type LayerConstructor = fn(&Config) -> Result<Stage>;

/// Maps layer names to constructors.
#[derive(Debug, Clone)]
pub struct LayerRegistry {
    constructors: IndexMap<String, LayerConstructor>,
}

impl Default for LayerRegistry {
    fn default() -> Self {
        let constructors = LayerKind::iter()
            .map(|kind| (kind.as_ref().to_owned(), builtin_constructor(kind)))
            .collect();
        Self { constructors }
    }
}

impl LayerRegistry {
    /// Create a registry without any layer.
    pub fn empty() -> Self {
        Self {
            constructors: IndexMap::new(),
        }
    }

    /// Register a constructor under a new name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        constructor: LayerConstructor,
    ) -> Result<()> {
        let name = name.into();
        ensure!(
            !self.constructors.contains_key(&name),
            "layer '{}' is already registered",
            name
        );
        self.constructors.insert(name, constructor);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.constructors.keys().map(String::as_str)
    }

    /// Build the stage registered under `name`.
    pub fn build(&self, name: &str, config: &Config) -> Result<Stage> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| format_err!("unknown layer '{}'", name))?;
        constructor(config).with_context(|| format!("fail to build layer '{}'", name))
    }
}

fn builtin_constructor(kind: LayerKind) -> LayerConstructor {
    match kind {
        LayerKind::Anchors => |config| Ok(Stage::Anchors(config.anchor_cache()?)),
        LayerKind::RegressBoxes => |config| {
            let coder = BoxCoder::new(config.regression_std)?;
            Ok(Stage::RegressBoxes(coder))
        },
        LayerKind::ClipBoxes => |_| Ok(Stage::ClipBoxes),
        LayerKind::FilterDetections => |config| {
            let filter = config.detection_filter_init().build()?;
            Ok(Stage::FilterDetections(filter))
        },
    }
}
