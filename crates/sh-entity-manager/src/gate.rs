//! Configuration validation gate
//!
//! Decides whether an entity's configuration is complete enough for its
//! handler to be initialized, and checks supplied values against a config
//! description on request.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use sh_core::{
    ChannelId, ConfigDescription, ConfigDescriptionParameter, Configuration, Entity, EntityId,
    EntityTypeId, ParameterType,
};
use sh_registries::{ChannelTypeProvider, ConfigDescriptionProvider, EntityTypeProvider};
use thiserror::Error;
use tracing::{debug, warn};

/// Where a parameter is configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigScope {
    Entity(EntityId),
    Channel(ChannelId),
}

impl fmt::Display for ConfigScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigScope::Entity(id) => write!(f, "{}", id),
            ConfigScope::Channel(id) => write!(f, "{}", id),
        }
    }
}

/// A required parameter without a usable value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingParameter {
    pub scope: ConfigScope,
    pub name: String,
}

impl fmt::Display for MissingParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.scope)
    }
}

/// Outcome of the completeness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Pending(Vec<MissingParameter>),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    /// Human-readable list of missing parameters
    pub fn description(&self) -> Option<String> {
        match self {
            Validation::Valid => None,
            Validation::Pending(missing) => Some(format!(
                "missing required parameters: {}",
                missing
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

/// Why one parameter value was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterViolation {
    #[error("parameter is required")]
    Required,

    #[error("expected a value of type {0:?}")]
    WrongType(ParameterType),

    #[error("value is below the minimum of {0}")]
    BelowMin(f64),

    #[error("value is above the maximum of {0}")]
    AboveMax(f64),

    #[error("value does not match pattern '{0}'")]
    PatternMismatch(String),

    #[error("pattern '{0}' is not a valid regular expression")]
    InvalidPattern(String),

    #[error("value is not one of the allowed options")]
    NotAnOption,
}

/// A rejected parameter value
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterError {
    pub parameter: String,
    pub violation: ParameterViolation,
}

/// Every parameter that failed validation
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid configuration: {}", format_errors(.errors))]
pub struct ConfigValidationError {
    pub errors: Vec<ParameterError>,
}

impl ConfigValidationError {
    /// Get the violation recorded for one parameter
    pub fn violation(&self, parameter: &str) -> Option<&ParameterViolation> {
        self.errors
            .iter()
            .find(|e| e.parameter == parameter)
            .map(|e| &e.violation)
    }
}

fn format_errors(errors: &[ParameterError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.parameter, e.violation))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Checks configurations against the config descriptions of their types
pub struct ConfigValidationGate {
    entity_types: Arc<dyn EntityTypeProvider>,
    channel_types: Arc<dyn ChannelTypeProvider>,
    descriptions: Arc<dyn ConfigDescriptionProvider>,
}

impl ConfigValidationGate {
    pub fn new(
        entity_types: Arc<dyn EntityTypeProvider>,
        channel_types: Arc<dyn ChannelTypeProvider>,
        descriptions: Arc<dyn ConfigDescriptionProvider>,
    ) -> Self {
        Self {
            entity_types,
            channel_types,
            descriptions,
        }
    }

    /// Check that every required parameter of the entity and its channels is set
    ///
    /// Types without a config description impose no requirements.
    pub fn validate(&self, entity: &Entity) -> Validation {
        let mut missing = Vec::new();

        if let Some(description) = self.entity_description(entity.entity_type()) {
            collect_missing(
                &description,
                entity.configuration(),
                ConfigScope::Entity(entity.id().clone()),
                &mut missing,
            );
        }

        for channel in entity.channels() {
            let description = channel
                .channel_type()
                .and_then(|type_id| self.channel_types.channel_type(type_id))
                .and_then(|channel_type| channel_type.config_description_uri)
                .and_then(|uri| self.descriptions.config_description(&uri));

            if let Some(description) = description {
                collect_missing(
                    &description,
                    channel.configuration(),
                    ConfigScope::Channel(channel.id().clone()),
                    &mut missing,
                );
            }
        }

        if missing.is_empty() {
            Validation::Valid
        } else {
            debug!(entity_id = %entity.id(), missing = missing.len(), "Configuration incomplete");
            Validation::Pending(missing)
        }
    }

    /// URI of the config description of an entity type
    pub fn entity_description_uri(&self, entity_type: &EntityTypeId) -> Option<String> {
        self.entity_types
            .entity_type(entity_type)
            .and_then(|t| t.config_description_uri)
    }

    fn entity_description(&self, entity_type: &EntityTypeId) -> Option<ConfigDescription> {
        let uri = self.entity_description_uri(entity_type)?;
        let description = self.descriptions.config_description(&uri);
        if description.is_none() {
            warn!(entity_type = %entity_type, uri = %uri, "Config description not found");
        }
        description
    }

    /// Check supplied values against the description at `uri`
    ///
    /// Parameters not in the description are ignored; an unknown URI accepts
    /// everything.
    pub fn validate_parameters(
        &self,
        uri: &str,
        configuration: &Configuration,
    ) -> Result<(), ConfigValidationError> {
        let Some(description) = self.descriptions.config_description(uri) else {
            return Ok(());
        };

        let errors: Vec<ParameterError> = description
            .parameters
            .iter()
            .filter_map(|parameter| {
                check_parameter(parameter, configuration).err().map(|violation| ParameterError {
                    parameter: parameter.name.clone(),
                    violation,
                })
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigValidationError { errors })
        }
    }
}

fn collect_missing(
    description: &ConfigDescription,
    configuration: &Configuration,
    scope: ConfigScope,
    missing: &mut Vec<MissingParameter>,
) {
    for parameter in description.required_parameters() {
        if !configuration.is_set(&parameter.name) {
            missing.push(MissingParameter {
                scope: scope.clone(),
                name: parameter.name.clone(),
            });
        }
    }
}

fn check_parameter(
    parameter: &ConfigDescriptionParameter,
    configuration: &Configuration,
) -> Result<(), ParameterViolation> {
    if !configuration.is_set(&parameter.name) {
        return if parameter.required {
            Err(ParameterViolation::Required)
        } else {
            Ok(())
        };
    }
    let Some(value) = configuration.get(&parameter.name) else {
        return Ok(());
    };

    match parameter.kind {
        ParameterType::Text => {
            let text = value
                .as_str()
                .ok_or(ParameterViolation::WrongType(ParameterType::Text))?;
            check_bounds(parameter, text.chars().count() as f64)?;
            if let Some(ref pattern) = parameter.pattern {
                let regex = Regex::new(&format!("^(?:{})$", pattern))
                    .map_err(|_| ParameterViolation::InvalidPattern(pattern.clone()))?;
                if !regex.is_match(text) {
                    return Err(ParameterViolation::PatternMismatch(pattern.clone()));
                }
            }
        }
        ParameterType::Integer => {
            let number = as_number(value)
                .filter(|n| n.fract() == 0.0)
                .ok_or(ParameterViolation::WrongType(ParameterType::Integer))?;
            check_bounds(parameter, number)?;
        }
        ParameterType::Decimal => {
            let number =
                as_number(value).ok_or(ParameterViolation::WrongType(ParameterType::Decimal))?;
            check_bounds(parameter, number)?;
        }
        ParameterType::Boolean => {
            let is_bool = match value {
                Value::Bool(_) => true,
                Value::String(s) => s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false"),
                _ => false,
            };
            if !is_bool {
                return Err(ParameterViolation::WrongType(ParameterType::Boolean));
            }
        }
    }

    if parameter.limit_to_options && !parameter.options.is_empty() && !parameter.is_option(value) {
        return Err(ParameterViolation::NotAnOption);
    }

    Ok(())
}

/// Numbers may arrive as JSON numbers or as numeric strings
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn check_bounds(parameter: &ConfigDescriptionParameter, value: f64) -> Result<(), ParameterViolation> {
    if let Some(min) = parameter.min {
        if value < min {
            return Err(ParameterViolation::BelowMin(min));
        }
    }
    if let Some(max) = parameter.max {
        if value > max {
            return Err(ParameterViolation::AboveMax(max));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sh_core::{ChannelBuilder, ChannelType, ChannelTypeId, EntityBuilder, EntityType};
    use sh_registries::TypeCatalog;

    const ENTITY_URI: &str = "binding:thing";
    const CHANNEL_URI: &str = "binding:channel";

    fn catalog() -> Arc<TypeCatalog> {
        let catalog = TypeCatalog::new();
        catalog.add_entity_type(
            EntityType::new(EntityTypeId::new("binding", "thing").unwrap(), "Thing")
                .with_config_description(ENTITY_URI),
        );
        catalog.add_channel_type(
            ChannelType::new(ChannelTypeId::new("binding", "channel").unwrap(), "Channel")
                .with_config_description(CHANNEL_URI),
        );
        catalog.add_config_description(
            ConfigDescription::new(ENTITY_URI)
                .with_parameter(ConfigDescriptionParameter::new("host", ParameterType::Text).required())
                .with_parameter(
                    ConfigDescriptionParameter::new("port", ParameterType::Integer)
                        .with_range(Some(1.0), Some(65535.0)),
                )
                .with_parameter(
                    ConfigDescriptionParameter::new("mac", ParameterType::Text)
                        .with_pattern("[0-9a-f]{12}"),
                )
                .with_parameter(
                    ConfigDescriptionParameter::new("mode", ParameterType::Text)
                        .with_options(["fast", "slow"]),
                ),
        );
        catalog.add_config_description(
            ConfigDescription::new(CHANNEL_URI).with_parameter(
                ConfigDescriptionParameter::new("interval", ParameterType::Decimal).required(),
            ),
        );
        Arc::new(catalog)
    }

    fn gate() -> ConfigValidationGate {
        let catalog = catalog();
        ConfigValidationGate::new(catalog.clone(), catalog.clone(), catalog)
    }

    fn entity(configuration: Configuration, channel_configuration: Option<Configuration>) -> Entity {
        let type_id = EntityTypeId::new("binding", "thing").unwrap();
        let id = EntityId::new(&type_id, "thing").unwrap();
        let mut builder = EntityBuilder::create(type_id, id.clone()).with_configuration(configuration);
        if let Some(channel_configuration) = channel_configuration {
            builder = builder.with_channel(
                ChannelBuilder::create(ChannelId::new(&id, "channel").unwrap())
                    .with_type(ChannelTypeId::new("binding", "channel").unwrap())
                    .with_configuration(channel_configuration)
                    .build(),
            );
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_complete_configuration_is_valid() {
        let entity = entity(
            Configuration::new().with("host", "10.0.0.2"),
            Some(Configuration::new().with("interval", 2.5)),
        );
        assert_eq!(gate().validate(&entity), Validation::Valid);
    }

    #[test]
    fn test_missing_entity_parameter_is_pending() {
        let entity = entity(Configuration::new().with("host", ""), None);
        let validation = gate().validate(&entity);

        match validation {
            Validation::Pending(ref missing) => {
                assert_eq!(missing.len(), 1);
                assert_eq!(missing[0].name, "host");
                assert!(matches!(missing[0].scope, ConfigScope::Entity(_)));
            }
            Validation::Valid => panic!("expected pending"),
        }
        assert!(validation.description().unwrap().contains("host"));
    }

    #[test]
    fn test_missing_channel_parameter_is_pending() {
        let entity = entity(
            Configuration::new().with("host", "10.0.0.2"),
            Some(Configuration::new().with("interval", Value::Null)),
        );
        match gate().validate(&entity) {
            Validation::Pending(missing) => {
                assert_eq!(missing.len(), 1);
                assert!(matches!(missing[0].scope, ConfigScope::Channel(_)));
            }
            Validation::Valid => panic!("expected pending"),
        }
    }

    #[test]
    fn test_unknown_type_has_no_requirements() {
        let empty = Arc::new(TypeCatalog::new());
        let gate = ConfigValidationGate::new(empty.clone(), empty.clone(), empty);
        assert!(gate.validate(&entity(Configuration::new(), None)).is_valid());
    }

    #[test]
    fn test_validate_parameters_accepts_valid_values() {
        let configuration = Configuration::new()
            .with("host", "10.0.0.2")
            .with("port", "8080")
            .with("mac", "a1b2c3d4e5f6")
            .with("mode", "fast");
        assert_eq!(gate().validate_parameters(ENTITY_URI, &configuration), Ok(()));
    }

    #[test]
    fn test_validate_parameters_collects_every_violation() {
        let configuration = Configuration::new()
            .with("port", 70000)
            .with("mac", "not-a-mac")
            .with("mode", "medium");

        let err = gate()
            .validate_parameters(ENTITY_URI, &configuration)
            .unwrap_err();

        assert_eq!(err.errors.len(), 4);
        assert_eq!(err.violation("host"), Some(&ParameterViolation::Required));
        assert_eq!(err.violation("port"), Some(&ParameterViolation::AboveMax(65535.0)));
        assert!(matches!(err.violation("mac"), Some(ParameterViolation::PatternMismatch(_))));
        assert_eq!(err.violation("mode"), Some(&ParameterViolation::NotAnOption));
    }

    #[test]
    fn test_validate_parameters_type_checks() {
        let configuration = Configuration::new()
            .with("host", json!(42))
            .with("port", 1.5);
        let err = gate()
            .validate_parameters(ENTITY_URI, &configuration)
            .unwrap_err();

        assert_eq!(
            err.violation("host"),
            Some(&ParameterViolation::WrongType(ParameterType::Text))
        );
        assert_eq!(
            err.violation("port"),
            Some(&ParameterViolation::WrongType(ParameterType::Integer))
        );
    }

    #[test]
    fn test_pattern_must_match_whole_value() {
        let configuration = Configuration::new()
            .with("host", "h")
            .with("mac", "a1b2c3d4e5f6ff");
        let err = gate()
            .validate_parameters(ENTITY_URI, &configuration)
            .unwrap_err();
        assert!(matches!(err.violation("mac"), Some(ParameterViolation::PatternMismatch(_))));
    }

    #[test]
    fn test_unknown_uri_accepts_everything() {
        let configuration = Configuration::new().with("anything", 1);
        assert!(gate().validate_parameters("binding:unknown", &configuration).is_ok());
    }
}
