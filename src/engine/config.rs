//! Purpose: Serde model of the engine's JSON configuration.
//! Exports: `EngineConfig`, `InboundConfig`, `OutboundConfig`, `RoutingConfig`, `RoutingRule`,
//! `parse_config`.
//! Role: First stage of the build pipeline; turns text into a typed model.
//! Invariants: Only syntax and field types are checked here; semantics belong to `plan`.
//! Invariants: Unknown top-level sections are ignored so richer configs still parse.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub inbounds: Vec<InboundConfig>,
    #[serde(default)]
    pub outbounds: Vec<OutboundConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingConfig>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    #[serde(default)]
    pub inbound_tag: Vec<String>,
    #[serde(default)]
    pub domain: Vec<String>,
    /// A number, a `"from-to"` range, or a comma list of either.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<Value>,
    pub outbound_tag: String,
}

pub fn parse_config(text: &str) -> Result<EngineConfig, Error> {
    serde_json::from_str(text).map_err(|err| {
        Error::new(ErrorKind::ConfigParse)
            .with_message("invalid config json")
            .with_source(err)
    })
}

/// Decodes a protocol's `settings` object; absent settings take the type's defaults.
pub(crate) fn parse_settings<T>(settings: &Option<Value>, owner: &str) -> Result<T, Error>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match settings {
        None => Ok(T::default()),
        Some(value) => T::deserialize(value).map_err(|err| {
            Error::new(ErrorKind::EngineInit)
                .with_message(format!("invalid {owner} settings"))
                .with_source(err)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_config, parse_settings};
    use crate::core::error::ErrorKind;

    #[test]
    fn parses_inbounds_outbounds_and_rules() {
        let config = parse_config(
            r#"{
                "log": {"loglevel": "warning"},
                "inbounds": [
                    {"tag": "in", "protocol": "http", "listen": "127.0.0.1", "port": 10808}
                ],
                "outbounds": [
                    {"tag": "direct", "protocol": "freedom"},
                    {"tag": "block", "protocol": "blackhole"}
                ],
                "routing": {"rules": [{"domain": ["domain:ads.test"], "outboundTag": "block"}]}
            }"#,
        )
        .expect("parse");

        assert_eq!(config.inbounds.len(), 1);
        assert_eq!(config.inbounds[0].port, 10808);
        assert_eq!(config.inbounds[0].listen.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.outbounds[1].protocol, "blackhole");
        let rules = &config.routing.expect("routing").rules;
        assert_eq!(rules[0].outbound_tag, "block");
        assert_eq!(rules[0].domain, ["domain:ads.test"]);
    }

    #[test]
    fn empty_object_is_an_empty_config() {
        let config = parse_config("{}").expect("parse");
        assert!(config.inbounds.is_empty());
        assert!(config.outbounds.is_empty());
        assert!(config.routing.is_none());
    }

    #[test]
    fn malformed_text_is_a_parse_error() {
        let bad_port = r#"{"inbounds": [{"protocol": "http", "port": "x"}]}"#;
        for text in ["", "{", "not json", bad_port] {
            let err = parse_config(text).expect_err("must fail");
            assert_eq!(err.kind(), ErrorKind::ConfigParse, "input: {text}");
        }
    }

    #[derive(Debug, Default, serde::Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        timeout: u64,
    }

    #[test]
    fn settings_default_when_absent_and_name_their_owner_on_error() {
        let absent: Sample = parse_settings(&None, "sample inbound").expect("defaults");
        assert_eq!(absent, Sample::default());

        let present: Sample =
            parse_settings(&Some(serde_json::json!({"timeout": 7})), "sample inbound")
                .expect("settings");
        assert_eq!(present.timeout, 7);

        let wrong_type = Some(serde_json::json!({"timeout": "x"}));
        let err = parse_settings::<Sample>(&wrong_type, "sample inbound").expect_err("wrong type");
        assert_eq!(err.kind(), ErrorKind::EngineInit);
        assert_eq!(err.message(), Some("invalid sample inbound settings"));
    }
}
