//! Collection writes: `setvar`, `expirevar` and `initcol`-style bindings.

use crate::engine::Transaction;
use crate::error::{Error, Result};
use crate::macros::Macro;
use crate::variables::{Variable, VariableKind};
use tracing::debug;

/// Operation performed by `setvar`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetVarOp {
    /// `name=value` (a bare `name` stores `1`).
    Set(Macro),
    /// `name=+N`.
    Add(Macro),
    /// `name=-N`.
    Sub(Macro),
    /// `!name`.
    Delete,
}

/// A compiled `setvar` target and operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetVar {
    /// Collection written (`TX` or a persistent collection).
    pub collection: Variable,
    /// Key inside the collection.
    pub key: Macro,
    /// Operation.
    pub op: SetVarOp,
}

/// Split `collection.key` and check the collection can be written.
pub(crate) fn parse_target(action: &str, target: &str) -> Result<(Variable, String)> {
    let target = target.trim();
    let (name, key) = target
        .split_once('.')
        .ok_or_else(|| Error::action(action, format!("expected collection.key, got {target}")))?;
    let collection = Variable::parse(name)
        .ok_or_else(|| Error::action(action, format!("unknown collection {name}")))?;
    if collection != Variable::Tx && collection.kind() != VariableKind::Persistent {
        return Err(Error::action(action, format!("collection {name} is not writable")));
    }
    if key.is_empty() {
        return Err(Error::action(action, "empty key"));
    }
    Ok((collection, key.to_string()))
}

impl SetVar {
    /// Parse the `setvar:` argument.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if let Some(target) = value.strip_prefix('!') {
            let (collection, key) = parse_target("setvar", target)?;
            return Ok(Self {
                collection,
                key: Macro::new(&key)?,
                op: SetVarOp::Delete,
            });
        }

        let (target, rhs) = match value.split_once('=') {
            Some((target, rhs)) => (target, Some(rhs)),
            None => (value, None),
        };
        let (collection, key) = parse_target("setvar", target)?;
        let op = match rhs {
            None => SetVarOp::Set(Macro::new("1")?),
            Some(rhs) => {
                if let Some(n) = rhs.strip_prefix('+') {
                    SetVarOp::Add(Macro::new(n)?)
                } else if let Some(n) = rhs.strip_prefix('-') {
                    SetVarOp::Sub(Macro::new(n)?)
                } else {
                    SetVarOp::Set(Macro::new(rhs)?)
                }
            }
        };
        Ok(Self {
            collection,
            key: Macro::new(&key)?,
            op,
        })
    }

    pub(crate) fn evaluate(&self, tx: &mut Transaction) {
        let key = self.key.expand(&tx.vars);
        let now = tx.now_epoch();
        let delta = match &self.op {
            SetVarOp::Add(m) => Some(parse_int(&m.expand(&tx.vars))),
            SetVarOp::Sub(m) => Some(-parse_int(&m.expand(&tx.vars))),
            _ => None,
        };
        debug!(collection = %self.collection, key = %key, op = ?self.op, "setvar");

        if self.collection == Variable::Tx {
            match (&self.op, delta) {
                (SetVarOp::Delete, _) => tx.vars.remove(Variable::Tx, &key),
                (SetVarOp::Set(m), _) => {
                    let value = m.expand(&tx.vars);
                    if let Some(map) = tx.vars.map_mut(Variable::Tx) {
                        map.set(&key, vec![value]);
                    }
                }
                (_, Some(delta)) => {
                    let current = tx.vars.first(Variable::Tx, &key).map_or(0, parse_int);
                    let value = current.saturating_add(delta).to_string();
                    if let Some(map) = tx.vars.map_mut(Variable::Tx) {
                        map.set(&key, vec![value]);
                    }
                }
                _ => {}
            }
            return;
        }

        let value = match &self.op {
            SetVarOp::Set(m) => Some(m.expand(&tx.vars)),
            _ => None,
        };
        let Some(collection) = tx.vars.persistent(self.collection) else {
            return;
        };
        match (&self.op, delta, value) {
            (SetVarOp::Delete, _, _) => collection.remove(&key, now),
            (_, Some(delta), _) => collection.sum(&key, delta, now),
            (_, _, Some(value)) => collection.set(&key, &value, now),
            _ => {}
        }
    }
}

fn parse_int(value: &str) -> i64 {
    value.trim().parse::<i64>().unwrap_or(0)
}

/// `expirevar:collection.key=SECONDS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpireVar {
    /// Persistent collection.
    pub collection: Variable,
    /// Key inside the collection.
    pub key: Macro,
    /// Time to live in seconds.
    pub seconds: Macro,
}

impl ExpireVar {
    /// Parse the `expirevar:` argument.
    pub fn parse(value: &str) -> Result<Self> {
        let (target, seconds) = value
            .split_once('=')
            .ok_or_else(|| Error::action("expirevar", "expected collection.key=seconds"))?;
        let (collection, key) = parse_target("expirevar", target)?;
        Ok(Self {
            collection,
            key: Macro::new(&key)?,
            seconds: Macro::new(seconds.trim())?,
        })
    }

    pub(crate) fn evaluate(&self, tx: &mut Transaction) {
        let key = self.key.expand(&tx.vars);
        let Ok(seconds) = self.seconds.expand(&tx.vars).trim().parse::<u64>() else {
            debug!(key = %key, "expirevar: invalid duration");
            return;
        };
        match tx.vars.persistent(self.collection) {
            Some(collection) => collection.expire(&key, seconds),
            None => debug!(collection = %self.collection, "expirevar on a transient collection"),
        }
    }
}

/// `initcol:collection=KEY`, `setsid:KEY` and `setuid:KEY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitCol {
    /// Persistent collection to bind.
    pub collection: Variable,
    /// Collection key.
    pub key: Macro,
}

impl InitCol {
    /// Parse the `initcol:` argument.
    pub fn parse(value: &str) -> Result<Self> {
        let (name, key) = value
            .split_once('=')
            .ok_or_else(|| Error::action("initcol", "expected collection=key"))?;
        let collection = Variable::parse(name.trim())
            .filter(|v| v.kind() == VariableKind::Persistent)
            .ok_or_else(|| Error::action("initcol", format!("not a persistent collection: {name}")))?;
        Ok(Self {
            collection,
            key: Macro::new(key.trim())?,
        })
    }

    /// Binding for `setsid` / `setuid`.
    pub fn for_collection(collection: Variable, key: &str) -> Result<Self> {
        Ok(Self {
            collection,
            key: Macro::new(key.trim())?,
        })
    }

    pub(crate) fn evaluate(&self, tx: &mut Transaction) {
        let key = self.key.expand(&tx.vars);
        let now = tx.now_epoch();
        match self.collection {
            Variable::Session => tx.vars.set(Variable::SessionId, key.clone()),
            Variable::User => tx.vars.set(Variable::UserId, key.clone()),
            _ => {}
        }
        if let Some(collection) = tx.vars.persistent_mut(self.collection) {
            collection.bind(&key, now);
        }
    }
}
