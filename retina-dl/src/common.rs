pub use anyhow::{ensure, format_err, Context as _, Result};
pub use approx::assert_abs_diff_eq;
pub use bbox::{prelude::*, CyCxHW, HW, TLBR};
pub use derivative::Derivative;
pub use getset::Getters;
pub use indexmap::{IndexMap, IndexSet};
pub use itertools::{iproduct, izip, Itertools as _};
pub use label::GroundTruth;
pub use log::{debug, info};
pub use ndarray::{concatenate, stack, Array2, Array3, ArrayView2, ArrayView3, Axis};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator};
pub use std::{
    cmp::{self, Reverse},
    fmt::Debug,
    num::NonZeroUsize,
    ops::Range,
    path::Path,
    str::FromStr,
    sync::Arc,
};
