//! Lossless float (de)serialization for JSON snapshots.
//!
//! JSON has no NaN or infinities, and NaN is the batch placeholder for
//! missing values, so non-finite floats are written as the strings
//! `"NaN"`, `"inf"` and `"-inf"`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Repr {
    Num(f64),
    Special(String),
}

fn to_repr(x: f64) -> Repr {
    if x.is_finite() {
        Repr::Num(x)
    } else if x.is_nan() {
        Repr::Special("NaN".to_string())
    } else if x > 0.0 {
        Repr::Special("inf".to_string())
    } else {
        Repr::Special("-inf".to_string())
    }
}

fn from_repr<E: serde::de::Error>(repr: Repr) -> Result<f64, E> {
    match repr {
        Repr::Num(x) => Ok(x),
        Repr::Special(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            other => Err(E::custom(format!("invalid float literal '{other}'"))),
        },
    }
}

pub mod scalar {
    use super::{from_repr, to_repr, Deserialize, Deserializer, Repr, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        to_repr(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        from_repr(Repr::deserialize(deserializer)?)
    }
}

pub mod vec64 {
    use super::{from_repr, to_repr, Deserialize, Deserializer, Repr, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|x| to_repr(*x)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<Repr>::deserialize(deserializer)?
            .into_iter()
            .map(from_repr)
            .collect()
    }
}

pub mod vec32 {
    use super::{from_repr, to_repr, Deserialize, Deserializer, Repr, Serializer};

    pub fn serialize<S: Serializer>(values: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|x| to_repr(f64::from(*x))))
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        Vec::<Repr>::deserialize(deserializer)?
            .into_iter()
            .map(|r| from_repr(r).map(|x: f64| x as f32))
            .collect()
    }
}

pub mod ragged64 {
    use super::{from_repr, to_repr, Deserialize, Deserializer, Repr, Serializer};

    pub fn serialize<S: Serializer>(rows: &[Vec<f64>], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<Vec<Repr>> = rows
            .iter()
            .map(|row| row.iter().map(|x| to_repr(*x)).collect())
            .collect();
        serializer.collect_seq(encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<f64>>, D::Error> {
        Vec::<Vec<Repr>>::deserialize(deserializer)?
            .into_iter()
            .map(|row| row.into_iter().map(from_repr).collect())
            .collect()
    }
}
