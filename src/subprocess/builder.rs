use std::path::Path;

use crate::subprocess::ProcessCommand;

pub struct ProcessCommandBuilder {
    command: ProcessCommand,
}

impl ProcessCommandBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            command: ProcessCommand {
                program: program.to_string(),
                args: Vec::new(),
            },
        }
    }

    /// Start from a path, typically a freshly linked binary
    pub fn from_path(program: &Path) -> Self {
        Self::new(&program.to_string_lossy())
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.command.args.push(arg.to_string());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(&path.to_string_lossy())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.command
            .args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// Append `-o <path>`
    pub fn output(self, path: &Path) -> Self {
        self.arg("-o").path_arg(path)
    }

    pub fn build(self) -> ProcessCommand {
        self.command
    }
}
