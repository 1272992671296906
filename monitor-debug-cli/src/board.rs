//! The simulated board the console talks to, and its extra shell commands.

use std::io::Write;
use std::sync::Arc;

use monitor_debug::shell::{parse_arg, Command, Shell, ShellContext, ShellError, Target};
use monitor_debug::sim::{Machine, SimBus};
use monitor_debug::{ConsoleBuffer, RegisterBus};

use crate::config::{Config, Function};

pub struct Board {
    machine: Machine,
    functions: Vec<Function>,
}

impl Board {
    /// Build the simulated core described by `config`, with every function loaded.
    pub fn new(config: &Config, console: Arc<ConsoleBuffer>) -> Self {
        let mut bus = SimBus::new(config.fpb.code_comparators, config.fpb.literal_comparators)
            .with_revision(config.fpb.revision);
        bus.set_halting_debug(config.halting_debug);

        for function in &config.functions {
            tracing::debug!("Loading {} at {:#010x}", function.name, function.address);
            bus.load(function.address, &function.instructions);
        }

        Self {
            machine: Machine::new(bus, console),
            functions: config.functions.clone(),
        }
    }

    /// The simulated core.
    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// The functions selected by a `call` argument: a name, an address, or all of them.
    fn select(&self, arg: Option<&str>) -> Result<Vec<Function>, ShellError> {
        let Some(arg) = arg else {
            return Ok(self.functions.clone());
        };

        if let Some(function) = self.functions.iter().find(|f| f.name == arg) {
            return Ok(vec![function.clone()]);
        }

        let address = parse_arg(&[arg], 0, "[Function Name | Address]")?;
        Ok(vec![Function {
            name: format!("{:#x}", address),
            address,
            instructions: Vec::new(),
        }])
    }
}

impl Target for Board {
    fn bus(&mut self) -> &mut dyn RegisterBus {
        self.machine.bus_mut()
    }

    fn issue_breakpoint(&mut self) -> Result<(), ShellError> {
        self.machine.issue_breakpoint()
    }
}

/// The debug shell with the board's function commands added.
pub fn shell() -> Shell<Board> {
    let mut shell = Shell::new();

    shell.add_command(Command {
        name: "call",
        help_text: "Invoke dummy functions [Function Name | Address], all without argument",
        function: call,
    });

    shell.add_command(Command {
        name: "dump_funcs",
        help_text: "Print first instruction of each dummy function",
        function: |ctx, _args| {
            let addresses: Vec<u32> = ctx.target.functions.iter().map(|f| f.address).collect();

            for address in addresses {
                let instruction = ctx.target.bus().read_word_32(address);
                writeln!(ctx.out, "Instruction at {:#x} = {:#x}", address, instruction)?;
            }

            Ok(())
        },
    });

    shell
}

fn call(ctx: &mut ShellContext<'_, Board>, args: &[&str]) -> Result<(), ShellError> {
    let functions = ctx.target.select(args.first().copied())?;

    for function in functions {
        let summary = ctx
            .target
            .machine
            .call(function.address)
            .map_err(ShellError::target)?;

        writeln!(
            ctx.out,
            "{} returned after {} instructions, {} debug exceptions",
            function.name,
            summary.executed,
            summary.traps.len()
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use monitor_debug::monitor::mode;

    fn run(board: &mut Board, line: &str) -> Result<String, ShellError> {
        let shell = shell();
        let mut out = Vec::new();
        shell.handle_line(
            line,
            &mut ShellContext {
                target: board,
                out: &mut out,
            },
        )?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn board() -> Board {
        Board::new(&Config::default(), Arc::new(ConsoleBuffer::new()))
    }

    #[test]
    fn call_all_functions() {
        let mut board = board();

        let out = run(&mut board, "call").unwrap();

        assert_eq!(out.lines().count(), 10);
        assert!(out.starts_with(
            "dummy_function_1 returned after 3 instructions, 0 debug exceptions\n"
        ));
    }

    #[test]
    fn call_by_name_and_address_with_breakpoint() {
        let mut board = board();
        mode::enable(board.bus()).unwrap();
        run(&mut board, "fpb_set_breakpoint 0 0x080001aa").unwrap();
        board.machine.console().push_from_isr(b'c');

        let out = run(&mut board, "call dummy_function_3").unwrap();
        assert_eq!(
            out,
            "dummy_function_3 returned after 3 instructions, 2 debug exceptions\n"
        );

        let out = run(&mut board, "call 0x080001b0").unwrap();
        assert_eq!(
            out,
            "0x80001b0 returned after 3 instructions, 0 debug exceptions\n"
        );
    }

    #[test]
    fn call_of_unknown_function() {
        let mut board = board();

        assert!(matches!(
            run(&mut board, "call dummy_function_42"),
            Err(ShellError::InvalidArgument { .. })
        ));
        assert!(matches!(
            run(&mut board, "call 0x08004000"),
            Err(ShellError::Target(_))
        ));
    }

    #[test]
    fn dump_first_instructions() {
        let mut board = board();

        let out = run(&mut board, "dump_funcs").unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "Instruction at 0x8000198 = 0x30012001");
        assert_eq!(lines[9], "Instruction at 0x20000100 = 0xbf002000");
    }
}
