//! The command shell on the debug console.
//!
//! Characters from the console are collected into a line with [`Shell::receive_char`];
//! a newline dispatches the line to one of the registered [`Command`]s.

use std::io::Write;
use std::num::ParseIntError;

use crate::error::{FpbError, MonitorError};
use crate::fpb::Fpb;
use crate::memory::RegisterBus;
use crate::monitor::mode;

/// Prompt printed before every line.
pub const PROMPT: &str = "shell> ";

/// Longest line the shell accepts, longer input is ignored until the newline.
pub const MAX_LINE_LEN: usize = 256;

/// Errors a shell command can fail with.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum ShellError {
    /// Unknown command '{0}', enter 'help' for a list of commands.
    UnknownCommand(String),

    /// Expected {0}.
    MissingArgument(&'static str),

    /// Failed to parse argument '{argument}'.
    InvalidArgument {
        /// The argument as entered.
        argument: String,
        /// Why it is not a number.
        source: ParseIntError,
    },

    /// {0}
    Fpb(#[from] FpbError),

    /// {0}
    Monitor(#[from] MonitorError),

    /// The target failed to execute the command: {0}
    Target(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failed to write the command output.
    Io(#[from] std::io::Error),
}

impl ShellError {
    /// Wrap an error reported by a [`Target`] implementation.
    pub fn target(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Target(Box::new(error))
    }
}

/// The device the shell commands act on.
pub trait Target {
    /// The debug register bus of the device.
    fn bus(&mut self) -> &mut dyn RegisterBus;

    /// Execute a `BKPT` instruction on the device.
    fn issue_breakpoint(&mut self) -> Result<(), ShellError>;
}

/// Everything a command has access to while it runs.
pub struct ShellContext<'a, T: ?Sized> {
    pub target: &'a mut T,
    pub out: &'a mut dyn Write,
}

/// Signature of a command implementation. `args` excludes the command name.
pub type CommandFn<T> = fn(&mut ShellContext<'_, T>, args: &[&str]) -> Result<(), ShellError>;

/// An entry of the command table.
pub struct Command<T> {
    pub name: &'static str,
    pub help_text: &'static str,
    pub function: CommandFn<T>,
}

/// Line editor and command dispatcher for commands acting on a `T`.
///
/// Hosts with more state than the bare [`Target`] use their own type as `T`, so
/// the commands they add can reach it.
pub struct Shell<T> {
    commands: Vec<Command<T>>,
    line: String,
    overflowed: bool,
}

impl<T: Target> Shell<T> {
    /// A shell with the built-in debug commands.
    pub fn new() -> Self {
        let mut shell = Shell {
            commands: Vec::new(),
            line: String::with_capacity(MAX_LINE_LEN),
            overflowed: false,
        };

        shell.add_command(Command {
            name: "bkpt",
            help_text: "Issue a Breakpoint Exception",
            function: |ctx: &mut ShellContext<'_, T>, _args| ctx.target.issue_breakpoint(),
        });

        shell.add_command(Command {
            name: "debug_mon_en",
            help_text: "Enable Monitor Debug Mode",
            function: |ctx: &mut ShellContext<'_, T>, _args| {
                mode::enable(ctx.target.bus())?;
                Ok(())
            },
        });

        shell.add_command(Command {
            name: "debug_mon_dis",
            help_text: "Disable Monitor Debug Mode",
            function: |ctx: &mut ShellContext<'_, T>, _args| {
                mode::disable(ctx.target.bus());
                Ok(())
            },
        });

        shell.add_command(Command {
            name: "fpb_dump",
            help_text: "Dump Active FPB Settings",
            function: dump_fpb_config,
        });

        shell.add_command(Command {
            name: "fpb_set_breakpoint",
            help_text: "Set Breakpoint [Comp Id] [Address]",
            function: |ctx: &mut ShellContext<'_, T>, args| {
                let comp_id = parse_arg(args, 0, "[Comp Id] [Address]")? as usize;
                let address = parse_arg(args, 1, "[Comp Id] [Address]")?;

                let result = Fpb::new(ctx.target.bus()).set_breakpoint(comp_id, address);

                writeln!(
                    ctx.out,
                    "Set breakpoint on address {:#x} in FP_COMP[{}] {}",
                    address,
                    comp_id,
                    if result.is_ok() { "Succeeded" } else { "Failed" }
                )?;

                Ok(result?)
            },
        });

        shell.add_command(Command {
            name: "fpb_clear_breakpoint",
            help_text: "Clear Breakpoint [Comp Id]",
            function: |ctx: &mut ShellContext<'_, T>, args| {
                let comp_id = parse_arg(args, 0, "[Comp Id]")? as usize;

                Fpb::new(ctx.target.bus()).clear_breakpoint(comp_id)?;

                writeln!(ctx.out, "Cleared FP_COMP[{}]", comp_id)?;
                Ok(())
            },
        });

        shell
    }

    /// Register an additional command. Later registrations do not replace earlier
    /// ones with the same name.
    pub fn add_command(&mut self, command: Command<T>) {
        self.commands.push(command)
    }

    /// Names of all registered commands, including `help`.
    pub fn command_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once("help").chain(self.commands.iter().map(|c| c.name))
    }

    /// Print the prompt.
    pub fn prompt(&self, out: &mut dyn Write) -> std::io::Result<()> {
        write!(out, "{}", PROMPT)?;
        out.flush()
    }

    /// Feed one received character.
    ///
    /// Printable characters are echoed, backspace removes the last one, and a
    /// newline runs the line and prints a new prompt. Command failures are printed,
    /// only failures to write the output are returned.
    pub fn receive_char(
        &mut self,
        c: char,
        ctx: &mut ShellContext<'_, T>,
    ) -> std::io::Result<()> {
        match c {
            '\n' => {
                writeln!(ctx.out)?;

                let line = std::mem::take(&mut self.line);
                if std::mem::take(&mut self.overflowed) {
                    writeln!(ctx.out, "Line too long, ignored")?;
                } else if let Err(error) = self.handle_line(&line, ctx) {
                    tracing::warn!("Command '{}' failed: {}", line.trim(), error);
                    writeln!(ctx.out, "{}", error)?;
                }

                self.prompt(ctx.out)
            }
            // Terminals send CR LF, the LF ends the line.
            '\r' => Ok(()),
            '\x08' | '\x7f' => {
                if self.line.pop().is_some() {
                    write!(ctx.out, "\x08 \x08")?;
                }
                ctx.out.flush()
            }
            c if c.is_control() => Ok(()),
            c => {
                if self.line.len() + c.len_utf8() > MAX_LINE_LEN {
                    self.overflowed = true;
                    return Ok(());
                }

                self.line.push(c);
                write!(ctx.out, "{}", c)?;
                ctx.out.flush()
            }
        }
    }

    /// Run one command line.
    pub fn handle_line(
        &self,
        line: &str,
        ctx: &mut ShellContext<'_, T>,
    ) -> Result<(), ShellError> {
        let mut command_parts = line.split_whitespace();

        let Some(command) = command_parts.next() else {
            return Ok(());
        };

        if command == "help" {
            for cmd in &self.commands {
                writeln!(ctx.out, "{}: {}", cmd.name, cmd.help_text)?;
            }
            writeln!(ctx.out, "help: Lists all commands")?;
            return Ok(());
        }

        let Some(cmd) = self.commands.iter().find(|c| c.name == command) else {
            return Err(ShellError::UnknownCommand(command.to_owned()));
        };

        let remaining_args: Vec<&str> = command_parts.collect();

        tracing::debug!("Running '{}' {:?}", cmd.name, remaining_args);
        (cmd.function)(ctx, &remaining_args)
    }
}

impl<T: Target> Default for Shell<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the argument at `index` as a number. Decimal, `0x`, `0o` and `0b` are accepted.
pub fn parse_arg(args: &[&str], index: usize, usage: &'static str) -> Result<u32, ShellError> {
    let argument = args.get(index).ok_or(ShellError::MissingArgument(usage))?;

    parse_int::parse::<u32>(argument).map_err(|source| ShellError::InvalidArgument {
        argument: argument.to_string(),
        source,
    })
}

fn dump_fpb_config<T: Target>(
    ctx: &mut ShellContext<'_, T>,
    _args: &[&str],
) -> Result<(), ShellError> {
    let mut fpb = Fpb::new(ctx.target.bus());
    let config = fpb.config();

    writeln!(
        ctx.out,
        "FPB Revision: {}: Enabled: {}. Hardware Breakpoints: {}. Literal Comparators: {}",
        config.revision,
        config.enabled as u8,
        config.num_code_comparators,
        config.num_literal_comparators
    )?;

    for comp_id in 0..config.num_comparators() {
        let Ok(entry) = fpb.comparator(comp_id) else {
            continue;
        };

        if !entry.enabled {
            writeln!(ctx.out, "  FP_COMP[{}] Disabled", comp_id)?;
            continue;
        }

        writeln!(
            ctx.out,
            "  FP_COMP[{}] Replace: {}, Address {:#x}",
            comp_id,
            entry.replace.bits(),
            entry.address
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registers::{Demcr, Dhcsr, MemoryMappedRegister};
    use crate::test::MockMemory;
    use pretty_assertions::assert_eq;

    struct MockTarget {
        memory: MockMemory,
        breakpoints_issued: usize,
    }

    impl MockTarget {
        fn new() -> Self {
            Self {
                memory: MockMemory::with_fpb(0, 6, 2),
                breakpoints_issued: 0,
            }
        }
    }

    impl Target for MockTarget {
        fn bus(&mut self) -> &mut dyn RegisterBus {
            &mut self.memory
        }

        fn issue_breakpoint(&mut self) -> Result<(), ShellError> {
            self.breakpoints_issued += 1;
            Ok(())
        }
    }

    fn run(
        shell: &Shell<MockTarget>,
        target: &mut MockTarget,
        line: &str,
    ) -> (Result<(), ShellError>, String) {
        let mut out = Vec::new();
        let result = shell.handle_line(
            line,
            &mut ShellContext {
                target,
                out: &mut out,
            },
        );
        (result, String::from_utf8(out).unwrap())
    }

    fn type_line(shell: &mut Shell<MockTarget>, target: &mut MockTarget, input: &str) -> String {
        let mut out = Vec::new();
        let mut ctx = ShellContext {
            target,
            out: &mut out,
        };
        for c in input.chars() {
            shell.receive_char(c, &mut ctx).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn set_breakpoint_reports_success() {
        let shell = Shell::new();
        let mut target = MockTarget::new();

        let (result, out) = run(&shell, &mut target, "fpb_set_breakpoint 1 0x080001a6");

        assert!(result.is_ok());
        assert_eq!(
            out,
            "Set breakpoint on address 0x80001a6 in FP_COMP[1] Succeeded\n"
        );

        let (_, out) = run(&shell, &mut target, "fpb_dump");
        assert_eq!(
            out,
            "FPB Revision: 0: Enabled: 1. Hardware Breakpoints: 6. Literal Comparators: 2\n\
             \x20 FP_COMP[0] Disabled\n\
             \x20 FP_COMP[1] Replace: 2, Address 0x80001a6\n\
             \x20 FP_COMP[2] Disabled\n\
             \x20 FP_COMP[3] Disabled\n\
             \x20 FP_COMP[4] Disabled\n\
             \x20 FP_COMP[5] Disabled\n\
             \x20 FP_COMP[6] Disabled\n\
             \x20 FP_COMP[7] Disabled\n"
        );
    }

    #[test]
    fn set_breakpoint_reports_failure() {
        let shell = Shell::new();
        let mut target = MockTarget::new();

        let (result, out) = run(&shell, &mut target, "fpb_set_breakpoint 0 0x20000100");

        assert!(matches!(
            result,
            Err(ShellError::Fpb(FpbError::AddressOutOfCodeRegion(0x2000_0100)))
        ));
        assert_eq!(
            out,
            "Set breakpoint on address 0x20000100 in FP_COMP[0] Failed\n"
        );
    }

    #[test]
    fn set_breakpoint_needs_two_numbers() {
        let shell = Shell::new();
        let mut target = MockTarget::new();

        let (result, _) = run(&shell, &mut target, "fpb_set_breakpoint 0");
        assert!(matches!(result, Err(ShellError::MissingArgument(_))));

        let (result, _) = run(&shell, &mut target, "fpb_set_breakpoint zero 0x100");
        assert!(
            matches!(result, Err(ShellError::InvalidArgument { ref argument, .. }) if argument == "zero")
        );

        assert!(target.memory.writes.is_empty());
    }

    #[test]
    fn monitor_commands() {
        let shell = Shell::new();
        let mut target = MockTarget::new();

        run(&shell, &mut target, "debug_mon_en").0.unwrap();
        assert!(Demcr::from(target.memory.word(Demcr::ADDRESS)).mon_en());

        run(&shell, &mut target, "debug_mon_dis").0.unwrap();
        assert!(!Demcr::from(target.memory.word(Demcr::ADDRESS)).mon_en());

        target.memory.set_word(Dhcsr::ADDRESS, 1);
        let (result, _) = run(&shell, &mut target, "debug_mon_en");
        assert!(matches!(
            result,
            Err(ShellError::Monitor(MonitorError::HaltingDebugActive))
        ));
    }

    #[test]
    fn bkpt_goes_to_the_target() {
        let shell = Shell::new();
        let mut target = MockTarget::new();

        run(&shell, &mut target, "bkpt").0.unwrap();

        assert_eq!(target.breakpoints_issued, 1);
    }

    #[test]
    fn unknown_and_empty_lines() {
        let shell = Shell::new();
        let mut target = MockTarget::new();

        assert!(run(&shell, &mut target, "   ").0.is_ok());
        assert!(matches!(
            run(&shell, &mut target, "frobnicate 1").0,
            Err(ShellError::UnknownCommand(ref name)) if name == "frobnicate"
        ));
    }

    #[test]
    fn help_lists_every_command() {
        let shell = Shell::new();
        let mut target = MockTarget::new();

        let (_, out) = run(&shell, &mut target, "help");

        for name in shell.command_names() {
            assert!(out.contains(&format!("{}: ", name)), "{} missing", name);
        }
    }

    #[test]
    fn typed_line_is_echoed_and_run() {
        let mut shell = Shell::new();
        let mut target = MockTarget::new();

        let out = type_line(&mut shell, &mut target, "bkq\x08pt\r\n");

        assert_eq!(out, "bkq\x08 \x08pt\nshell> ");
        assert_eq!(target.breakpoints_issued, 1);
    }

    #[test]
    fn errors_are_printed_not_returned() {
        let mut shell = Shell::new();
        let mut target = MockTarget::new();

        let out = type_line(&mut shell, &mut target, "fpb_set_breakpoint 9 0x100\n");

        assert!(out.contains("Failed"));
        assert!(out.contains("Comparator 9 is not implemented"));
        assert!(out.ends_with(PROMPT));
    }

    #[test]
    fn overlong_lines_are_dropped() {
        let mut shell = Shell::new();
        let mut target = MockTarget::new();

        let long = "b".repeat(MAX_LINE_LEN + 10) + "\nbkpt\n";
        let out = type_line(&mut shell, &mut target, &long);

        assert!(out.contains("Line too long, ignored"));
        assert_eq!(target.breakpoints_issued, 1);
    }
}
