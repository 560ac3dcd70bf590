//! Deployment plans.
//!
//! A plan is an ordered list of steps, each deploying one contract. Steps may
//! pass the address of an earlier step to their constructor:
//!
//! ```toml
//! [[steps]]
//! contract = "MyContractA"
//!
//! [[steps]]
//! contract = "MyContractB"
//!
//! [[steps]]
//! contract = "MyContractC"
//! args = [{ address_of = "MyContractA" }, { address_of = "MyContractB" }]
//! ```

use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{
    U256,
    utils::{parse_ether, parse_units},
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::DeployError;

/// An amount of native currency, in wei.
///
/// Written in plans as a decimal with an optional unit: `"0.01"` (ether),
/// `"10 gwei"` or `"5 wei"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(pub U256);

impl Amount {
    pub fn wei(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl std::str::FromStr for Amount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('-') {
            return Err(format!("value `{s}` must not be negative"));
        }

        let wei = match s.split_once(char::is_whitespace) {
            Some((number, unit)) => {
                parse_units(number.trim(), unit.trim()).map(|units| units.get_absolute())
            }
            None => parse_ether(s),
        }
        .map_err(|e| format!("invalid value `{s}`: {e}"))?;

        Ok(Self(wei))
    }
}

impl TryFrom<String> for Amount {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} wei", self.0)
    }
}

/// A literal constructor argument, coerced to the constructor's ABI type at
/// pre-flight. Large integers are written as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Bool(bool),
    Integer(i64),
    Text(String),
    List(Vec<LiteralValue>),
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// A constructor argument of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstructorArg {
    /// The address produced by an earlier step.
    AddressOf { address_of: String },
    /// The deploying account's address. Must be `true`.
    Sender { sender: bool },
    /// The execution time of the step as a unix timestamp, plus `unix_time_plus` seconds.
    UnixTimePlus { unix_time_plus: u64 },
    Literal(LiteralValue),
}

impl ConstructorArg {
    pub fn address_of(step: impl Into<String>) -> Self {
        Self::AddressOf {
            address_of: step.into(),
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(LiteralValue::Text(value.into()))
    }

    /// The step this argument refers to, if any.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::AddressOf { address_of } => Some(address_of),
            _ => None,
        }
    }
}

/// One contract deployment of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentStep {
    /// Identifier used by back-references. Defaults to the contract name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Contract name, as compiled.
    pub contract: String,
    /// Artifact file, relative to the artifacts directory. Needed only when
    /// several artifacts share the contract name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ConstructorArg>,
    /// Value sent with the deployment. The constructor must be payable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Amount>,
}

impl DeploymentStep {
    pub fn new(contract: impl Into<String>) -> Self {
        Self {
            id: None,
            contract: contract.into(),
            artifact: None,
            args: Vec::new(),
            value: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn arg(mut self, arg: ConstructorArg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = Some(value);
        self
    }

    /// The identifier other steps use to refer to this one.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.contract)
    }

    /// The value sent with the deployment, zero if unset.
    pub fn value(&self) -> U256 {
        self.value.map(|v| v.wei()).unwrap_or_default()
    }
}

/// An ordered list of deployments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<DeploymentStep>,
}

impl DeploymentPlan {
    pub fn new(steps: Vec<DeploymentStep>) -> Self {
        Self { name: None, steps }
    }

    /// Parse a plan from TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self, DeployError> {
        toml::from_str(contents).map_err(|e| DeployError::InvalidPlan(e.to_string()))
    }

    /// Read a plan file. The plan name defaults to the file stem.
    pub fn load(path: &Path) -> Result<Self, DeployError> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file {}", path.display()))?;

        let mut plan = Self::from_toml_str(&contents)?;
        if plan.name.is_none() {
            plan.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }

        Ok(plan)
    }

    /// The plan's name, or `"unnamed"`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    /// Check the plan is well formed: it has steps, ids are unique and every
    /// back-reference points to an earlier step.
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.steps.is_empty() {
            return Err(DeployError::InvalidPlan("plan has no steps".to_string()));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.contract.trim().is_empty() {
                return Err(DeployError::InvalidPlan(format!(
                    "step #{} has an empty contract name",
                    index + 1
                )));
            }

            let id = step.id();
            for arg in &step.args {
                match arg {
                    ConstructorArg::AddressOf { address_of } if !seen.contains(address_of.as_str()) => {
                        return Err(DeployError::UnresolvedReference {
                            step: id.to_string(),
                            target: address_of.clone(),
                        });
                    }
                    ConstructorArg::Sender { sender: false } => {
                        return Err(DeployError::InvalidPlan(format!(
                            "step `{id}`: `sender = false` is not a valid argument"
                        )));
                    }
                    _ => {}
                }
            }

            if !seen.insert(id) {
                return Err(DeployError::InvalidPlan(format!(
                    "step id `{id}` is used more than once (set a distinct `id`)"
                )));
            }
        }

        Ok(())
    }

    /// SHA-256 of the plan's canonical JSON form, hex encoded.
    pub fn hash(&self) -> Result<String, DeployError> {
        let json = serde_json::to_string(self).context("Failed to serialize plan")?;

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());

        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELY_ON: &str = r#"
        name = "rely-on"

        [[steps]]
        contract = "MyContractA"

        [[steps]]
        contract = "MyContractB"

        [[steps]]
        contract = "MyContractC"
        args = [{ address_of = "MyContractA" }, { address_of = "MyContractB" }]
    "#;

    #[test]
    fn test_parse_plan_with_references() {
        let plan = DeploymentPlan::from_toml_str(RELY_ON).unwrap();

        assert_eq!(plan.display_name(), "rely-on");
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(
            plan.steps[2].args,
            vec![
                ConstructorArg::address_of("MyContractA"),
                ConstructorArg::address_of("MyContractB"),
            ]
        );
        plan.validate().unwrap();
    }

    #[test]
    fn test_parse_mixed_arguments() {
        let plan = DeploymentPlan::from_toml_str(
            r#"
                [[steps]]
                contract = "SimpleWithParams"
                args = [{ sender = true }, "0x356faDD245d35ff8F1a207aC83BE7EEa911abeEE", 100, 97]
                value = "0.01"

                [[steps]]
                contract = "Lock"
                args = [{ unix_time_plus = 60 }]
                value = "0.001"
            "#,
        )
        .unwrap();

        let step = &plan.steps[0];
        assert_eq!(step.args[0], ConstructorArg::Sender { sender: true });
        assert_eq!(
            step.args[1],
            ConstructorArg::literal("0x356faDD245d35ff8F1a207aC83BE7EEa911abeEE")
        );
        assert_eq!(step.args[2], ConstructorArg::Literal(LiteralValue::Integer(100)));
        assert_eq!(step.value(), U256::from(10_000_000_000_000_000u64));

        assert_eq!(
            plan.steps[1].args[0],
            ConstructorArg::UnixTimePlus { unix_time_plus: 60 }
        );
        assert_eq!(plan.steps[1].value(), U256::from(1_000_000_000_000_000u64));
    }

    #[test]
    fn test_amount_units() {
        assert_eq!("0.01".parse::<Amount>().unwrap().wei(), U256::from(10u64.pow(16)));
        assert_eq!("10 gwei".parse::<Amount>().unwrap().wei(), U256::from(10u64.pow(10)));
        assert_eq!("5 wei".parse::<Amount>().unwrap().wei(), U256::from(5));
        assert_eq!("1.5 gwei".parse::<Amount>().unwrap().wei(), U256::from(1_500_000_000u64));
        assert_eq!("2 ether".parse::<Amount>().unwrap().wei(), U256::from(2 * 10u64.pow(18)));
        assert!("-5 gwei".parse::<Amount>().is_err());
        assert!("-1".parse::<Amount>().is_err());
        assert!("1 parsec".parse::<Amount>().is_err());
        assert!("lots".parse::<Amount>().is_err());
    }

    #[test]
    fn test_forward_and_self_references_rejected() {
        let forward = DeploymentPlan::new(vec![
            DeploymentStep::new("MyContractC").arg(ConstructorArg::address_of("MyContractA")),
            DeploymentStep::new("MyContractA"),
        ]);
        assert!(matches!(
            forward.validate(),
            Err(DeployError::UnresolvedReference { step, target })
                if step == "MyContractC" && target == "MyContractA"
        ));

        let self_ref = DeploymentPlan::new(vec![
            DeploymentStep::new("Proxy").arg(ConstructorArg::address_of("Proxy")),
        ]);
        assert!(matches!(
            self_ref.validate(),
            Err(DeployError::UnresolvedReference { .. })
        ));

        let undefined = DeploymentPlan::new(vec![
            DeploymentStep::new("MyContractC").arg(ConstructorArg::address_of("Nope")),
        ]);
        assert!(matches!(
            undefined.validate(),
            Err(DeployError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_duplicate_ids_and_empty_plans_rejected() {
        let duplicate = DeploymentPlan::new(vec![
            DeploymentStep::new("Token"),
            DeploymentStep::new("Token"),
        ]);
        assert!(matches!(duplicate.validate(), Err(DeployError::InvalidPlan(_))));

        let distinct = DeploymentPlan::new(vec![
            DeploymentStep::new("Token").with_id("usdc"),
            DeploymentStep::new("Token").with_id("dai"),
        ]);
        distinct.validate().unwrap();

        assert!(matches!(
            DeploymentPlan::default().validate(),
            Err(DeployError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_sender_false_rejected() {
        let plan = DeploymentPlan::new(vec![
            DeploymentStep::new("Vault").arg(ConstructorArg::Sender { sender: false }),
        ]);
        assert!(matches!(plan.validate(), Err(DeployError::InvalidPlan(_))));
    }

    #[test]
    fn test_unknown_step_keys_rejected() {
        let err = DeploymentPlan::from_toml_str(
            r#"
                [[steps]]
                contract = "Lock"
                gas = 100
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, DeployError::InvalidPlan(_)));
    }

    #[test]
    fn test_hash_is_stable() {
        let a = DeploymentPlan::from_toml_str(RELY_ON).unwrap();
        let b = DeploymentPlan::from_toml_str(RELY_ON).unwrap();
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
        assert_eq!(a.hash().unwrap().len(), 64);

        let mut c = b.clone();
        c.steps.pop();
        assert_ne!(a.hash().unwrap(), c.hash().unwrap());
    }

    #[test]
    fn test_literal_display() {
        let list = LiteralValue::List(vec![LiteralValue::Integer(1), LiteralValue::Bool(true)]);
        assert_eq!(list.to_string(), "[1, true]");
    }

    #[test]
    fn test_bundled_plans_are_valid() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../plans");
        for name in ["rely-on", "with-params", "lock", "batch-mint"] {
            let plan = DeploymentPlan::load(&dir.join(format!("{name}.toml"))).unwrap();
            assert_eq!(plan.display_name(), name);
            plan.validate().unwrap();
        }

        let with_params = DeploymentPlan::load(&dir.join("with-params.toml")).unwrap();
        assert_eq!(with_params.steps[0].value(), U256::from(10_000_000_000_000_000u64));
    }
}
