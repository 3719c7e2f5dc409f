use super::LdaModel;
use crate::Count;
use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeStruct,
    Deserialize, Serialize, Serializer,
};

static SERIALIZATION_VERSION: &str = "1.0";

type StdResult<T, E> = std::result::Result<T, E>;

impl Serialize for LdaModel {
    fn serialize<S>(&self, serializer: S) -> StdResult<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut model = serializer.serialize_struct("LdaModel", 6)?;

        model.serialize_field("version", SERIALIZATION_VERSION)?;
        model.serialize_field("voc_size", &self.voc_size)?;
        model.serialize_field("topic_num", &self.topic_num)?;
        model.serialize_field("alpha", &self.alpha)?;
        model.serialize_field("beta", &self.beta)?;
        model.serialize_field("model", &self.flatten())?;

        model.end()
    }
}

impl<'de> Deserialize<'de> for LdaModel {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_struct(
            "LdaModel",
            &["version", "voc_size", "topic_num", "alpha", "beta", "model"],
            LdaModelVisitor,
        )
    }
}

struct LdaModelVisitor;

impl<'de> Visitor<'de> for LdaModelVisitor {
    type Value = LdaModel;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("struct LdaModel")
    }

    fn visit_map<V>(self, mut map: V) -> StdResult<Self::Value, V::Error>
    where
        V: MapAccess<'de>,
    {
        let mut version: Option<String> = None;
        let mut voc_size: Option<usize> = None;
        let mut topic_num: Option<usize> = None;
        let mut alpha: Option<f64> = None;
        let mut beta: Option<f64> = None;
        let mut flat: Option<Vec<Count>> = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "version" => version = Some(map.next_value()?),
                "voc_size" => voc_size = Some(map.next_value()?),
                "topic_num" => topic_num = Some(map.next_value()?),
                "alpha" => alpha = Some(map.next_value()?),
                "beta" => beta = Some(map.next_value()?),
                "model" => flat = Some(map.next_value()?),
                _ => {
                    let _: serde::de::IgnoredAny = map.next_value()?;
                }
            }
        }

        match version {
            Some(v) if v == SERIALIZATION_VERSION => {}
            Some(v) => {
                return Err(serde::de::Error::custom(format!(
                    "unsupported version: {}",
                    v
                )))
            }
            None => return Err(serde::de::Error::missing_field("version")),
        }

        LdaModel::unflatten(
            voc_size.ok_or_else(|| serde::de::Error::missing_field("voc_size"))?,
            topic_num.ok_or_else(|| serde::de::Error::missing_field("topic_num"))?,
            alpha.ok_or_else(|| serde::de::Error::missing_field("alpha"))?,
            beta.ok_or_else(|| serde::de::Error::missing_field("beta"))?,
            flat.ok_or_else(|| serde::de::Error::missing_field("model"))?,
        )
        .map_err(serde::de::Error::custom)
    }
}
