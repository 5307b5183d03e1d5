use std::path::PathBuf;

use thiserror::Error;

use crate::backend::DeviceError;

#[derive(Debug, Error)]
pub enum PlotterError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid plot file: {0}")]
    InvalidPlotSpec(#[from] burst_plot_spec::SpecError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, PlotterError>;
