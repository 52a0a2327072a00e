//! Arithmetic blocks: `gain` and `sum`
//!
//! Integers stay integers while the result fits in an `i64`; anything else
//! is computed in `f64`.

use crate::core::block::{Block, BlockError, BlockIo, BlockSpec, IoSpec, SignalDecl, UpdateStatus};
use crate::core::config::{ConfigDecl, ConfigMap};
use crate::core::signal::Value;

fn number(value: &Value, what: &str) -> Result<Value, BlockError> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        other => Err(BlockError::failed(format!("{} is not a number: {}", what, other))),
    }
}

fn combine(
    a: &Value,
    b: &Value,
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Value {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(result) = int(x, y) {
            return Value::from(result);
        }
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    Value::from(float(x, y))
}

/// `a * b`
pub fn mul(a: &Value, b: &Value) -> Value {
    combine(a, b, i64::checked_mul, |x, y| x * y)
}

/// `a + b`
pub fn add(a: &Value, b: &Value) -> Value {
    combine(a, b, i64::checked_add, |x, y| x + y)
}

/// `y = k * x`
pub struct GainBlock {
    k: Value,
}

impl GainBlock {
    pub fn spec() -> BlockSpec {
        BlockSpec::new("gain")
            .describe("Multiplies its input by a constant factor")
            .config(ConfigDecl::required("k", "factor").hint("number"))
            .inputs(IoSpec::Fixed(vec![SignalDecl::new("x", "number")]))
            .outputs(IoSpec::Fixed(vec![SignalDecl::new("y", "k * x")]))
    }

    pub fn new(config: &ConfigMap) -> Result<Self, BlockError> {
        let k = config
            .get("k")
            .ok_or_else(|| BlockError::MissingConfig("k".into()))?;
        let k = number(k, "config k").map_err(|e| BlockError::InvalidConfig {
            key: "k".into(),
            reason: e.to_string(),
        })?;
        Ok(Self { k })
    }
}

impl Block for GainBlock {
    fn update(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
        let x = number(io.input("x")?, "input x")?;
        let y = mul(&self.k, &x);
        io.set_output("y", y, None)?;
        Ok(UpdateStatus::Done)
    }
}

/// Sum of all inputs, once every input is ready
pub struct SumBlock;

impl SumBlock {
    pub fn spec() -> BlockSpec {
        BlockSpec::new("sum")
            .describe("Adds up its inputs")
            .inputs(IoSpec::variable(1, None))
            .outputs(IoSpec::Fixed(vec![SignalDecl::new("sum", "sum of the inputs")]))
    }
}

impl Block for SumBlock {
    fn update(&mut self, io: &mut BlockIo) -> Result<UpdateStatus, BlockError> {
        if !io.all_inputs_ready() {
            return Ok(UpdateStatus::Done);
        }
        let mut total = Value::from(0);
        for i in 0..io.num_inputs() {
            let value = number(io.input(i)?, "input")?;
            total = add(&total, &value);
        }
        io.set_output("sum", total, None)?;
        Ok(UpdateStatus::Done)
    }
}
