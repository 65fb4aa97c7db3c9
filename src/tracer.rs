//! Call tracer producing a nested JSON call frame per transaction.

use alloy_primitives::{Address, Bytes, U256};
use revm::{
    context_interface::{ContextTr, CreateScheme},
    interpreter::{CallInputs, CallOutcome, CreateInputs, CreateOutcome, InterpreterResult},
    Inspector,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::TraceError;

/// One call frame of a transaction trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub from: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    pub gas: u64,
    pub gas_used: u64,
    pub input: Bytes,
    #[serde(skip_serializing_if = "<[u8]>::is_empty")]
    pub output: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CallFrame>,
}

/// Records message calls and contract creations as a tree of [`CallFrame`]s.
///
/// Frames are pushed when a call or creation starts and folded into their parent when it
/// ends, so once the transaction is done the only frame left is the root.
#[derive(Debug, Clone, Default)]
pub struct CallTracer {
    stack: Vec<CallFrame>,
    root: Option<CallFrame>,
}

impl CallTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports transaction level gas on the root frame, which otherwise only covers
    /// execution after intrinsic gas.
    pub fn finish(&mut self, gas_limit: u64, gas_used: u64) {
        if let Some(root) = self.root.as_mut() {
            root.gas = gas_limit;
            root.gas_used = gas_used;
        }
    }

    /// The trace as a JSON value.
    pub fn result(&self) -> Result<Value, TraceError> {
        let root = self.root.as_ref().ok_or(TraceError::MissingFrame)?;
        serde_json::to_value(root).map_err(|err| TraceError::Encode(err.to_string()))
    }

    fn enter(&mut self, frame: CallFrame) {
        self.stack.push(frame);
    }

    /// Closes the innermost open frame. `created` is set for creations only.
    fn exit(&mut self, result: &InterpreterResult, created: Option<Address>) {
        let Some(mut frame) = self.stack.pop() else {
            return;
        };
        frame.gas_used = result.gas.spent();
        frame.output = result.output.clone();
        if created.is_some() {
            frame.to = created;
        }
        if !result.result.is_ok() {
            frame.error = Some(if result.result.is_revert() {
                "execution reverted".to_string()
            } else {
                format!("{:?}", result.result)
            });
        }
        match self.stack.last_mut() {
            Some(parent) => parent.calls.push(frame),
            None => self.root = Some(frame),
        }
    }
}

impl<CTX: ContextTr> Inspector<CTX> for CallTracer {
    fn call(&mut self, context: &mut CTX, inputs: &mut CallInputs) -> Option<CallOutcome> {
        self.enter(CallFrame {
            kind: format!("{:?}", inputs.scheme).to_uppercase(),
            from: inputs.caller,
            to: Some(inputs.target_address),
            value: Some(inputs.value.get()),
            gas: inputs.gas_limit,
            input: inputs.input.bytes(context),
            ..Default::default()
        });
        None
    }

    fn call_end(&mut self, _context: &mut CTX, _inputs: &CallInputs, outcome: &mut CallOutcome) {
        self.exit(&outcome.result, None);
    }

    fn create(&mut self, _context: &mut CTX, inputs: &mut CreateInputs) -> Option<CreateOutcome> {
        let kind = match inputs.scheme {
            CreateScheme::Create2 { .. } => "CREATE2",
            _ => "CREATE",
        };
        self.enter(CallFrame {
            kind: kind.to_string(),
            from: inputs.caller,
            value: Some(inputs.value),
            gas: inputs.gas_limit,
            input: inputs.init_code.clone(),
            ..Default::default()
        });
        None
    }

    fn create_end(
        &mut self,
        _context: &mut CTX,
        _inputs: &CreateInputs,
        outcome: &mut CreateOutcome,
    ) {
        self.exit(&outcome.result, outcome.address);
    }
}
