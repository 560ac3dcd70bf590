//! Sequential execution of deployment plans.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::{Address, TxHash, U256},
};
use serde::{Deserialize, Serialize};

use crate::{
    ArtifactStore, ChainClient, ConstructorArg, ContractArtifact, DeployError, DeployRequest,
    DeploymentPlan, DeploymentStep, ExecutionError, LiteralValue, NetworkProfile,
};

/// The record of one executed step. Created once, never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    /// The step id.
    pub step: String,
    pub contract: String,
    pub address: Address,
    pub tx_hash: TxHash,
    /// Constructor arguments as they were sent, references resolved.
    pub constructor_args: Vec<String>,
    /// Value sent with the deployment, in wei.
    pub value: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
}

/// A constructor argument checked against its ABI type.
#[derive(Debug, Clone)]
enum PreparedArg {
    Value(DynSolValue),
    AddressOf(String),
    Sender,
    UnixTimePlus { bits: usize, secs: u64 },
}

/// A step whose artifact is loaded and whose arguments match the constructor.
#[derive(Debug, Clone)]
pub struct PreparedStep {
    id: String,
    artifact: ContractArtifact,
    args: Vec<PreparedArg>,
    value: U256,
}

impl PreparedStep {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn artifact(&self) -> &ContractArtifact {
        &self.artifact
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    /// The constructor signature, e.g. `constructor(address,uint256)`.
    pub fn constructor_signature(&self) -> String {
        let types = self
            .artifact
            .constructor_inputs()
            .iter()
            .map(|p| p.selector_type().into_owned())
            .collect::<Vec<_>>()
            .join(",");
        format!("constructor({types})")
    }
}

/// A validated plan with every step pre-flighted. Building one needs no network.
#[derive(Debug, Clone)]
pub struct PreparedPlan {
    steps: Vec<PreparedStep>,
}

impl PreparedPlan {
    /// Validate `plan` and check every step against its artifact.
    pub fn prepare(plan: &DeploymentPlan, artifacts: &ArtifactStore) -> Result<Self, ExecutionError> {
        plan.validate().map_err(ExecutionError::before_execution)?;

        let steps = plan
            .steps
            .iter()
            .map(|step| {
                prepare_step(step, artifacts).map_err(|source| ExecutionError {
                    step: Some(step.id().to_string()),
                    source,
                    completed: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[PreparedStep] {
        &self.steps
    }
}

fn prepare_step(step: &DeploymentStep, artifacts: &ArtifactStore) -> Result<PreparedStep, DeployError> {
    let artifact = artifacts.load(&step.contract, step.artifact.as_deref())?;
    let types = artifact.constructor_types()?;
    let args = prepare_args(&step.contract, &types, &step.args)?;

    let value = step.value();
    if !value.is_zero() && !artifact.is_payable() {
        return Err(DeployError::ConstructorArgument {
            contract: step.contract.clone(),
            reason: format!("value {value} wei is sent but the constructor is not payable"),
        });
    }

    Ok(PreparedStep {
        id: step.id().to_string(),
        artifact,
        args,
        value,
    })
}

fn prepare_args(
    contract: &str,
    types: &[DynSolType],
    args: &[ConstructorArg],
) -> Result<Vec<PreparedArg>, DeployError> {
    let fail = |reason: String| DeployError::ConstructorArgument {
        contract: contract.to_string(),
        reason,
    };

    if types.len() != args.len() {
        return Err(fail(format!(
            "constructor takes {} argument(s) but {} were given",
            types.len(),
            args.len()
        )));
    }

    types
        .iter()
        .zip(args)
        .enumerate()
        .map(|(position, (ty, arg))| {
            let position = position + 1;
            match (arg, ty) {
                (ConstructorArg::AddressOf { address_of }, DynSolType::Address) => {
                    Ok(PreparedArg::AddressOf(address_of.clone()))
                }
                (ConstructorArg::Sender { .. }, DynSolType::Address) => Ok(PreparedArg::Sender),
                (ConstructorArg::AddressOf { .. } | ConstructorArg::Sender { .. }, ty) => {
                    Err(fail(format!(
                        "argument {position} is an address but the constructor expects `{}`",
                        ty.sol_type_name()
                    )))
                }
                (ConstructorArg::UnixTimePlus { unix_time_plus }, DynSolType::Uint(bits)) => {
                    Ok(PreparedArg::UnixTimePlus {
                        bits: *bits,
                        secs: *unix_time_plus,
                    })
                }
                (ConstructorArg::UnixTimePlus { .. }, ty) => Err(fail(format!(
                    "argument {position} is a timestamp but the constructor expects `{}`",
                    ty.sol_type_name()
                ))),
                (ConstructorArg::Literal(literal), ty) => coerce_literal(ty, literal)
                    .map(PreparedArg::Value)
                    .map_err(|e| fail(format!("argument {position} (`{literal}`): {e}"))),
            }
        })
        .collect()
}

/// Coerce a literal to `ty`. Lists map onto arrays and tuples element by element.
fn coerce_literal(ty: &DynSolType, literal: &LiteralValue) -> Result<DynSolValue, String> {
    let coerce_all = |inner: &DynSolType, items: &[LiteralValue]| {
        items
            .iter()
            .map(|item| coerce_literal(inner, item))
            .collect::<Result<Vec<_>, _>>()
    };

    match (ty, literal) {
        (DynSolType::Array(inner), LiteralValue::List(items)) => {
            coerce_all(&**inner, &items[..]).map(DynSolValue::Array)
        }
        (DynSolType::FixedArray(inner, len), LiteralValue::List(items)) => {
            if items.len() != *len {
                return Err(format!("expected {len} element(s), got {}", items.len()));
            }
            coerce_all(&**inner, &items[..]).map(DynSolValue::FixedArray)
        }
        (DynSolType::Tuple(types), LiteralValue::List(items)) => {
            if items.len() != types.len() {
                return Err(format!(
                    "expected {} tuple field(s), got {}",
                    types.len(),
                    items.len()
                ));
            }
            types
                .iter()
                .zip(items)
                .map(|(ty, item)| coerce_literal(ty, item))
                .collect::<Result<Vec<_>, _>>()
                .map(DynSolValue::Tuple)
        }
        (ty, LiteralValue::List(_)) => Err(format!("a list cannot be passed as `{}`", ty.sol_type_name())),
        // Taken verbatim: `coerce_str` would strip quotes and trailing whitespace.
        (DynSolType::String, LiteralValue::Text(text)) => Ok(DynSolValue::String(text.clone())),
        (ty, literal) => ty
            .coerce_str(&literal.to_string())
            .map_err(|e| format!("not a valid `{}`: {e}", ty.sol_type_name())),
    }
}

/// Render a value the way it is recorded in results.
fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(address) => address.to_string(),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Bytes(bytes) => format!("0x{}", hex::encode(bytes)),
        DynSolValue::FixedBytes(word, size) => format!("0x{}", hex::encode(&word[..*size])),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            format!(
                "[{}]",
                items.iter().map(format_value).collect::<Vec<_>>().join(", ")
            )
        }
        other => format!("{other:?}"),
    }
}

fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

/// Runs plans against one chain client, one step at a time.
pub struct Executor<C> {
    client: C,
    artifacts: ArtifactStore,
}

impl<C: ChainClient> Executor<C> {
    pub fn new(client: C, artifacts: ArtifactStore) -> Self {
        Self { client, artifacts }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Deploy every step of `plan` in order.
    ///
    /// The plan is validated and pre-flighted before anything is sent, then the
    /// endpoint's chain id is checked against `network`. The first failing step
    /// stops the run; the error carries the results of the steps before it.
    pub async fn execute(
        &self,
        plan: &DeploymentPlan,
        network: &NetworkProfile,
    ) -> Result<Vec<DeploymentResult>, ExecutionError> {
        let prepared = PreparedPlan::prepare(plan, &self.artifacts)?;

        let chain_id = self
            .client
            .chain_id()
            .await
            .map_err(ExecutionError::before_execution)?;
        if let Some(expected) = network.chain_id
            && expected != chain_id
        {
            return Err(ExecutionError::before_execution(DeployError::ChainIdMismatch {
                network: network.name.clone(),
                expected,
                actual: chain_id,
            }));
        }

        let sender = self.client.sender();
        let total = prepared.steps.len();

        tracing::info!(
            plan = plan.display_name(),
            network = %network.name,
            chain_id,
            %sender,
            steps = total,
            "Starting deployment"
        );

        let mut results: Vec<DeploymentResult> = Vec::with_capacity(total);
        for (index, step) in prepared.steps.iter().enumerate() {
            match self.execute_step(step, sender, &results, index + 1, total).await {
                Ok(result) => results.push(result),
                Err(source) => {
                    return Err(ExecutionError {
                        step: Some(step.id.clone()),
                        source,
                        completed: results,
                    });
                }
            }
        }

        Ok(results)
    }

    async fn execute_step(
        &self,
        step: &PreparedStep,
        sender: Address,
        completed: &[DeploymentResult],
        index: usize,
        total: usize,
    ) -> Result<DeploymentResult, DeployError> {
        let contract = &step.artifact.name;
        let values = step
            .args
            .iter()
            .map(|arg| resolve_arg(arg, contract, &step.id, sender, completed))
            .collect::<Result<Vec<_>, _>>()?;

        let code = step.artifact.deploy_code(&values)?;
        let constructor_args = values.iter().map(format_value).collect::<Vec<_>>();

        tracing::info!(
            step = %step.id,
            contract = %contract,
            index,
            total,
            args = ?constructor_args,
            value = %step.value,
            "Deploying contract"
        );

        let receipt = self
            .client
            .deploy_contract(DeployRequest {
                contract: contract.clone(),
                code,
                value: step.value,
            })
            .await?;

        tracing::info!(
            step = %step.id,
            contract = %contract,
            address = %receipt.address,
            tx_hash = %receipt.tx_hash,
            block_number = ?receipt.block_number,
            "Contract deployed"
        );

        Ok(DeploymentResult {
            step: step.id.clone(),
            contract: contract.clone(),
            address: receipt.address,
            tx_hash: receipt.tx_hash,
            constructor_args,
            value: step.value,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }
}

fn resolve_arg(
    arg: &PreparedArg,
    contract: &str,
    step: &str,
    sender: Address,
    completed: &[DeploymentResult],
) -> Result<DynSolValue, DeployError> {
    match arg {
        PreparedArg::Value(value) => Ok(value.clone()),
        PreparedArg::Sender => Ok(DynSolValue::Address(sender)),
        PreparedArg::AddressOf(target) => completed
            .iter()
            .find(|result| &result.step == target)
            .map(|result| DynSolValue::Address(result.address))
            .ok_or_else(|| DeployError::UnresolvedReference {
                step: step.to_string(),
                target: target.clone(),
            }),
        PreparedArg::UnixTimePlus { bits, secs } => {
            let timestamp = U256::from(unix_now()) + U256::from(*secs);
            if timestamp.bit_len() > *bits {
                return Err(DeployError::ConstructorArgument {
                    contract: contract.to_string(),
                    reason: format!("timestamp {timestamp} does not fit in uint{bits}"),
                });
            }
            Ok(DynSolValue::Uint(timestamp, *bits))
        }
    }
}
