pub use anyhow::{ensure, Context as _, Result};
pub use bbox::{prelude::*, HW};
pub use itertools::{izip, Itertools as _};
pub use log::{info, warn};
pub use ndarray::Array2;
pub use once_cell::sync::Lazy;
pub use semver::{Version, VersionReq};
pub use serde::{de::Error as DeserializeError, Deserialize, Deserializer, Serialize};
pub use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};
