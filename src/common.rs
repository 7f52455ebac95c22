use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt::Display;
use std::num::NonZeroU32;

/// The largest tensor and [Window](crate::window::Window) rank supported.
pub const MAX_DIMS: usize = 6;

pub type DimSize = NonZeroU32;
pub type Steps = SmallVec<[DimSize; MAX_DIMS]>;
pub type Coordinates = SmallVec<[i32; MAX_DIMS]>;

/// The element kind of a tensor.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    enum_iterator::Sequence,
    clap::ValueEnum,
)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum DataKind {
    #[value(name = "u8")]
    Uint8,
    #[value(name = "s16")]
    Sint16,
    #[value(name = "s32")]
    Sint32,
    #[value(name = "f16")]
    Float16,
    #[value(name = "f32")]
    Float32,
}

impl DataKind {
    /// The bytes required to represent a value of this DataKind.
    pub fn size(&self) -> u8 {
        match self {
            DataKind::Uint8 => 1,
            DataKind::Sint16 | DataKind::Float16 => 2,
            DataKind::Sint32 | DataKind::Float32 => 4,
        }
    }

    /// The name of the corresponding scalar type in kernel source.
    pub fn kernel_type_name(&self) -> &'static str {
        match self {
            DataKind::Uint8 => "uchar",
            DataKind::Sint16 => "short",
            DataKind::Sint32 => "int",
            DataKind::Float16 => "half",
            DataKind::Float32 => "float",
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataKind::Float16 | DataKind::Float32)
    }
}

impl Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataKind::Uint8 => write!(f, "u8"),
            DataKind::Sint16 => write!(f, "s16"),
            DataKind::Sint32 => write!(f, "s32"),
            DataKind::Float16 => write!(f, "f16"),
            DataKind::Float32 => write!(f, "f32"),
        }
    }
}

pub mod macros {
    pub mod internal {
        use crate::common::DimSize;

        pub trait IntoDimSize {
            fn into_dim_size(self) -> DimSize;
        }

        impl IntoDimSize for DimSize {
            fn into_dim_size(self) -> DimSize {
                self
            }
        }

        impl IntoDimSize for u32 {
            fn into_dim_size(self) -> DimSize {
                DimSize::new(self).unwrap()
            }
        }
    }

    /// Builds a [TensorShape](crate::shape::TensorShape) from extents.
    #[macro_export]
    macro_rules! shape {
        ($($dim:expr),*$(,)*) => {{
            $crate::shape::TensorShape::new(&[ $( $dim ),* ])
        }};
    }

    /// Builds [Steps](crate::common::Steps) from non-zero step sizes.
    #[macro_export]
    macro_rules! steps {
        ($($dim:expr),*$(,)*) => {{
            use $crate::common::macros::internal::IntoDimSize;
            // Bind to a variable with an explicit type to help out type inference.
            let sv: $crate::common::Steps = $crate::smallvec::smallvec![ $( ($dim).into_dim_size() ),* ];
            sv
        }};
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps;
    use proptest::prelude::*;

    #[test]
    fn test_steps_macro_builds_nonzero_steps() {
        let s = steps![4, 1, 2];
        assert_eq!(s.iter().map(|d| d.get()).collect::<Vec<_>>(), vec![4, 1, 2]);
    }

    #[test]
    fn test_all_data_kinds_have_distinct_kernel_type_names() {
        let names = enum_iterator::all::<DataKind>()
            .map(|k| k.kernel_type_name())
            .collect::<std::collections::HashSet<_>>();
        assert_eq!(names.len(), enum_iterator::cardinality::<DataKind>());
    }

    proptest! {
        #[test]
        fn test_float_kinds_are_two_or_four_bytes(kind in any::<DataKind>()) {
            if kind.is_float() {
                prop_assert!(kind.size() == 2 || kind.size() == 4);
            }
        }
    }
}
