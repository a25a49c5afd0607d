//! Sandbox image build tool.
//!
//! Builds the base container image for every registered language from the
//! dockerfiles under `build/dockerfiles/`, deduplicating by image name so
//! languages that share an image (C and C++ on the GCC image, the JVM
//! family on the OpenJDK image) build once.

use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use clap::Parser;

use kiln_core::languages::{self, Language};

#[derive(Parser, Debug)]
#[clap(name = "kiln-builder", version, about = "Build the sandbox base images")]
struct Cli {
    #[clap(long, help = "Build only the image for this language code")]
    lang: Option<String>,

    #[clap(long, short, help = "Stream full docker build progress")]
    verbose: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Some(code) = &cli.lang {
        let Some(language) = languages::by_code(code) else {
            bail!("language {code} does not exist in the registry");
        };

        return build_image(code, language, cli.verbose);
    }

    for (code, language) in languages::unique_by_image() {
        build_image(code, language, cli.verbose)?;
    }

    Ok(())
}

fn build_image(code: &str, language: &Language, verbose: bool) -> Result<()> {
    let dockerfile = format!("./build/dockerfiles/{}.dockerfile", language.dockerfile);

    log::info!(
        "building image {} for language {} from {}",
        language.image,
        code,
        dockerfile
    );

    let mut command = Command::new("docker");
    command
        .args(["build", "-f", &dockerfile, "-t", language.image])
        .stdout(if verbose { Stdio::inherit() } else { Stdio::null() })
        .stderr(Stdio::inherit());

    if verbose {
        command.arg("--progress=plain");
    }

    command.arg(".");

    let status = command
        .status()
        .with_context(|| format!("failed to invoke docker build for {}", language.image))?;

    if !status.success() {
        bail!("docker build for image {} failed with {status}", language.image);
    }

    Ok(())
}
