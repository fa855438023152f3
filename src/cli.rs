use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::postprocess::ScoreTransform;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve predictions over HTTP
    Serve(ServeArgs),
    /// Download the model artifact ahead of serving
    Fetch(FetchArgs),
    /// Load the model and print what it declares
    Inspect(InspectArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    /// ONNX model path
    #[arg(long, env = "RETINA_MODEL", default_value = "my_model.onnx")]
    pub model: PathBuf,

    /// Label file, one class name per line in output order
    #[arg(long, env = "RETINA_LABELS")]
    pub labels: Option<PathBuf>,

    #[arg(long, env = "RETINA_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "RETINA_PORT", default_value_t = 10000)]
    pub port: u16,

    /// Name reported by `GET /`
    #[arg(long, env = "RETINA_SERVICE_NAME", default_value = "Retinopathy API")]
    pub service_name: String,

    #[arg(long, env = "RETINA_SCORES", value_enum, default_value_t = ScoreTransform::Raw)]
    pub scores: ScoreTransform,

    /// Run the model on the CUDA execution provider
    #[arg(long, env = "RETINA_CUDA")]
    pub cuda: bool,

    /// Load the model before accepting traffic and exit on misconfiguration
    #[arg(long, env = "RETINA_PRELOAD")]
    pub preload: bool,

    #[arg(long, env = "RETINA_MAX_UPLOAD_BYTES", default_value_t = 16 * 1024 * 1024)]
    pub max_upload_bytes: usize,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct FetchArgs {
    /// Where to download the artifact from
    #[arg(long, env = "RETINA_MODEL_URL")]
    pub url: String,

    /// Destination path
    #[arg(long, env = "RETINA_MODEL", default_value = "my_model.onnx")]
    pub model: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct InspectArgs {
    /// ONNX model path
    #[arg(long, env = "RETINA_MODEL", default_value = "my_model.onnx")]
    pub model: PathBuf,

    #[arg(long)]
    pub cuda: bool,
}
