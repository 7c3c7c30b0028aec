//! Single-assignment local recovery.
//!
//! Obfuscators frequently park a decryption key in a local and load it right
//! before the call. A local qualifies as known when, across the whole method:
//!
//! - it is stored exactly once
//! - that store's immediate producer is a literal push (`nop`s in between
//!   are ignored)
//! - its address is never taken with `ldloca`
//!
//! # Basic Usage
//!
//! ```rust
//! use cflowkit::{
//!     analysis::{CfgBuilder, Literal, LocalValues},
//!     assembly::{Instruction, Opcode},
//!     metadata::{MethodBody, Token},
//! };
//!
//! let body = MethodBody::new(
//!     Token::new(0x0600_0001),
//!     vec![
//!         Instruction::ldc_i4(42),
//!         Instruction::stloc(0),
//!         Instruction::ldloc(0),
//!         Instruction::simple(Opcode::Ret),
//!     ],
//! );
//! let cfg = CfgBuilder::build(&body)?;
//! let locals = LocalValues::from_cfg(&cfg);
//! assert_eq!(locals.get(0), Some(&Literal::I4(42)));
//! # Ok::<(), cflowkit::Error>(())
//! ```

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{cfg::MethodCfg, Literal},
    assembly::{Instruction, Opcode},
};

#[derive(Debug, Default)]
struct LocalUses {
    stores: usize,
    value: Option<Literal>,
}

/// Locals of one method whose value is a compile-time constant.
#[derive(Debug, Clone, Default)]
pub struct LocalValues {
    values: HashMap<u16, Literal>,
}

impl LocalValues {
    /// An empty set; no local is known.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans every live block of `cfg`.
    #[must_use]
    pub fn from_cfg(cfg: &MethodCfg) -> Self {
        Self::from_blocks(cfg.blocks().map(|(_, b)| b.instructions()))
    }

    /// Scans instruction runs. A store only sees a producer inside its own run.
    pub fn from_blocks<'a, I>(runs: I) -> Self
    where
        I: IntoIterator<Item = &'a [Instruction]>,
    {
        let mut uses: HashMap<u16, LocalUses> = HashMap::new();
        let mut address_taken: HashSet<u16> = HashSet::new();

        for run in runs {
            for (index, instr) in run.iter().enumerate() {
                let Some(local) = instr.local() else {
                    continue;
                };
                match instr.opcode {
                    Opcode::Stloc => {
                        let entry = uses.entry(local).or_default();
                        entry.stores += 1;
                        entry.value = run[..index]
                            .iter()
                            .rfind(|i| !i.is_nop())
                            .and_then(Instruction::literal_value);
                    }
                    Opcode::Ldloca => {
                        address_taken.insert(local);
                    }
                    _ => {}
                }
            }
        }

        let values = uses
            .into_iter()
            .filter(|(local, u)| u.stores == 1 && !address_taken.contains(local))
            .filter_map(|(local, u)| u.value.map(|v| (local, v)))
            .collect();
        Self { values }
    }

    /// The known value of `local`.
    #[must_use]
    pub fn get(&self, local: u16) -> Option<&Literal> {
        self.values.get(&local)
    }

    /// Marks `local` as known. Used by callers that proved a value by other means.
    pub fn insert(&mut self, local: u16, value: Literal) {
        self.values.insert(local, value);
    }

    /// Number of known locals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no local is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
