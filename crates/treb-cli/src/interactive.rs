//! Interactive prompts for disambiguation and confirmation.
//!
//! Only used when both stdin and stdout are terminals and `--non-interactive`
//! was not given. Resolution itself never prompts; these helpers decide what
//! to do with the candidates it returns.

use std::io::IsTerminal;

use anyhow::Result;
use console::{Term, style};
use dialoguer::{Confirm, Select, theme::ColorfulTheme};

use treb_core::types::Deployment;

/// How the CLI reacts to ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Interactive,
    NonInteractive,
}

impl Mode {
    pub fn detect(non_interactive: bool) -> Self {
        if !non_interactive && std::io::stdin().is_terminal() && Term::stdout().is_term() {
            Self::Interactive
        } else {
            Self::NonInteractive
        }
    }

    pub fn is_interactive(self) -> bool {
        self == Self::Interactive
    }
}

/// One line per candidate, as shown in prompts.
pub fn describe(deployment: &Deployment) -> String {
    format!(
        "{:<40} {:<10} {}",
        deployment.id,
        deployment.kind.as_str(),
        deployment.address
    )
}

/// Ask the user to pick one of several matching deployments.
pub fn choose_deployment<'a>(
    identifier: &str,
    candidates: &[&'a Deployment],
) -> Result<Option<&'a Deployment>> {
    let theme = ColorfulTheme::default();
    let items: Vec<String> = candidates.iter().map(|d| describe(d)).collect();

    let selection = Select::with_theme(&theme)
        .with_prompt(format!(
            "'{}' matches {} deployments, pick one",
            identifier,
            candidates.len()
        ))
        .items(&items)
        .default(0)
        .interact_opt()?;

    Ok(selection.map(|index| candidates[index]))
}

/// Confirm applying a change to every listed deployment.
pub fn confirm_batch(action: &str, deployments: &[&Deployment]) -> Result<bool> {
    eprintln!(
        "{} {} will apply to {} deployments:",
        style("!").yellow().bold(),
        action,
        deployments.len()
    );
    for deployment in deployments {
        eprintln!("  {}", describe(deployment));
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Continue?")
        .default(false)
        .interact()?;
    Ok(confirmed)
}

/// Confirm a destructive operation.
pub fn confirm(prompt: &str) -> Result<bool> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}
