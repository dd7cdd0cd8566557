//! Console operator: tag prompts and upload progress.

use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;
use muloader::{Error, Operator, TagSession};

/// Operator that prompts on the terminal and draws a progress bar.
///
/// In non-interactive mode prompts are only logged and the upload continues
/// straight away.
pub struct ConsoleOperator {
    interactive: bool,
    quiet: bool,
    progress: ProgressBar,
}

impl ConsoleOperator {
    /// Create an operator for an upload of `total` padded bytes.
    pub fn new(total: u64, interactive: bool, quiet: bool, fancy: bool) -> Self {
        let progress = if quiet || !fancy {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(total);
            if let Ok(bar_style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            {
                pb.set_style(bar_style.progress_chars("#>-"));
            }
            pb.set_draw_target(ProgressDrawTarget::stderr());
            pb
        };

        Self {
            interactive,
            quiet,
            progress,
        }
    }

    /// Clear the progress bar once the session ends.
    pub fn finish(&self) {
        self.progress.finish_and_clear();
    }

    fn wait_for(&self, prompt: &str) -> muloader::Result<()> {
        if !self.interactive {
            info!("{prompt}");
            return Ok(());
        }

        let answer = self.progress.suspend(|| {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("{prompt}. Ready?"))
                .default(true)
                .interact_opt()
        });

        match answer {
            Ok(Some(true)) => Ok(()),
            Ok(_) => Err(Error::Interrupted),
            Err(dialoguer::Error::IO(e)) if e.kind() == std::io::ErrorKind::Interrupted => {
                Err(Error::Interrupted)
            },
            Err(dialoguer::Error::IO(e)) => Err(Error::Io(e)),
        }
    }
}

impl Operator for ConsoleOperator {
    fn present_tag(&mut self, index: usize) -> muloader::Result<()> {
        self.progress.set_message(format!("tag #{index}"));
        self.wait_for(&format!("Place tag #{index} on the reader"))
    }

    fn present_first_tag(&mut self) -> muloader::Result<()> {
        self.progress.set_message("confirming");
        self.wait_for("Place the first tag (#1) back on the reader to finish")
    }

    fn tag_started(&mut self, tag: &TagSession) {
        if !self.quiet {
            self.progress.println(format!(
                "{} Tag #{} ({} bytes free)",
                style("•").green(),
                tag.index,
                tag.token_capacity
            ));
        }
    }

    fn block_committed(&mut self, written: u64, _total: u64) {
        self.progress.set_position(written);
    }

    fn tag_finished(&mut self, tag: &TagSession, written: u64) {
        if !self.quiet {
            self.progress.println(format!(
                "{} Tag #{} written ({written} bytes)",
                style("✓").green(),
                tag.index
            ));
        }
    }
}
