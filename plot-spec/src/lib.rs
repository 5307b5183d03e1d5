use std::path::{Path, PathBuf};

use thiserror::Error;

pub const HASH_SIZE: usize = 32;
pub const HASHES_PER_PLOT: usize = 8192;
pub const PLOT_SIZE: usize = HASH_SIZE * HASHES_PER_PLOT;
pub const SCOOP_SIZE: usize = 64;
pub const SCOOPS_PER_PLOT: usize = PLOT_SIZE / SCOOP_SIZE;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("plot file name must be <address>_<startNonce>_<noncesNumber>_<staggerSize>, got {0:?}")]
    MalformedName(String),
    #[error("noncesNumber must be greater than zero")]
    ZeroNonces,
    #[error("staggerSize must be greater than zero")]
    ZeroStagger,
    #[error("noncesNumber {nonces} is not a multiple of staggerSize {stagger}")]
    UnalignedStagger { nonces: u64, stagger: u64 },
}

/// One output file: a contiguous nonce range stored stagger-interleaved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotFileSpec {
    pub account_id: u64,
    pub start_nonce: u64,
    pub nonces: u64,
    pub stagger: u64,
    pub path: PathBuf,
}

impl PlotFileSpec {
    pub fn new(
        account_id: u64,
        start_nonce: u64,
        nonces: u64,
        stagger: u64,
        path: PathBuf,
    ) -> Result<Self, SpecError> {
        if nonces == 0 {
            return Err(SpecError::ZeroNonces);
        }
        if stagger == 0 {
            return Err(SpecError::ZeroStagger);
        }
        if nonces % stagger != 0 {
            return Err(SpecError::UnalignedStagger { nonces, stagger });
        }
        Ok(Self {
            account_id,
            start_nonce,
            nonces,
            stagger,
            path,
        })
    }

    /// Parses the miner file-name grammar from the final path component.
    pub fn from_path(path: &Path) -> Result<Self, SpecError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SpecError::MalformedName(path.display().to_string()))?;

        let fields: Vec<u64> = name
            .split('_')
            .map(|f| f.parse::<u64>())
            .collect::<Result<_, _>>()
            .map_err(|_| SpecError::MalformedName(name.to_string()))?;
        let [account_id, start_nonce, nonces, stagger] = fields[..] else {
            return Err(SpecError::MalformedName(name.to_string()));
        };

        Self::new(account_id, start_nonce, nonces, stagger, path.to_path_buf())
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.account_id, self.start_nonce, self.nonces, self.stagger
        )
    }

    pub fn end_nonce(&self) -> u64 {
        self.start_nonce + self.nonces - 1
    }

    pub fn staggers(&self) -> u64 {
        self.nonces / self.stagger
    }

    /// Host-side transpose buffer size for one stagger.
    pub fn stagger_bytes(&self) -> usize {
        self.stagger as usize * PLOT_SIZE
    }

    /// Final size of the file on disk.
    pub fn file_bytes(&self) -> u64 {
        self.nonces * PLOT_SIZE as u64
    }
}

/// Byte offset of one scoop inside a single stagger buffer.
///
/// Within a stagger of `stagger` nonces, data is scoop-major: all copies of
/// scoop `j` sit together, one `SCOOP_SIZE` slot per nonce.
pub fn stagger_scoop_offset(local_nonce: u64, scoop: usize, stagger: u64) -> usize {
    scoop * stagger as usize * SCOOP_SIZE + (local_nonce % stagger) as usize * SCOOP_SIZE
}

/// Byte offset of one scoop inside the whole file, for the nonce at
/// zero-based position `local_nonce` of the file's range.
pub fn file_scoop_offset(local_nonce: u64, scoop: usize, stagger: u64) -> u64 {
    let group = local_nonce / stagger;
    group * stagger * PLOT_SIZE as u64 + stagger_scoop_offset(local_nonce, scoop, stagger) as u64
}
