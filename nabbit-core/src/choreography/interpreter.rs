//! Record-at-a-time interpreter
//!
//! Each call to [`Interpreter::next_step`] consumes one record and returns
//! the delay (from the previous record) and the action to run once it has
//! elapsed. Motor actions are non-blocking; only [`Action::AwaitIdle`]
//! waits for ears and sound.

use super::dialect::{Dialect, Opcode};
use super::palette::Palette;
use super::{program_body, END_MARKER};
use crate::ears::EarId;
use crate::traits::{Direction, Led, Rgb};

/// State shared by all programs run by one player
///
/// The branch value and motor directions persist across programs, like the
/// registers of the original firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// Value compared by `ifne`, see [`super::taichi_random`]
    pub random: u8,
    /// Direction used by `avance`, per ear
    pub directions: [Direction; 2],
    /// Palette used by palette opcodes
    pub palette: Palette,
    /// Palette slots picked by the streaming loop
    pub streaming_colors: [u8; 3],
}

impl Registers {
    /// Registers with the given branch value and a black palette
    pub fn new(random: u8) -> Self {
        Self {
            random,
            directions: [Direction::Forward; 2],
            palette: [Rgb::OFF; 8],
            streaming_colors: [0; 3],
        }
    }
}

/// Action decoded from one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    /// Nothing to do besides waiting
    Nop,
    /// Set one LED
    SetLed(Led, Rgb),
    /// Set every LED
    SetAll(Rgb),
    /// Start moving an ear to an absolute position
    GoEar { ear: EarId, position: u8, dir: Direction },
    /// Start moving an ear by a relative amount
    MoveEar { ear: EarId, delta: u8, dir: Direction },
    /// Start playing a random entry of [`super::MIDI_LIST`]
    RandomMidi,
    /// Wait until ears are stopped and sound is done
    AwaitIdle,
}

/// Reason the program stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Halt {
    /// Ran off the end of the program
    Finished,
    /// Explicit end marker opcode
    EndMarker,
    /// Opcode not in the dialect's table
    UnknownOpcode(u8),
    /// Operands run past the end of the program
    Truncated,
    /// LED index outside 0..=4
    InvalidLed(u8),
    /// Motor index outside 0..=1
    InvalidEar(u8),
    /// Branch target before the start of the program
    BadJump,
}

impl Halt {
    /// Check if the halt is a normal end rather than a malformed program
    pub fn is_normal(&self) -> bool {
        matches!(self, Halt::Finished | Halt::EndMarker)
    }
}

/// One decoded record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Delay since the previous record, in milliseconds
    pub wait_ms: u32,
    /// Action to run after the delay, or why the program ended
    pub action: Result<Action, Halt>,
}

/// Interpreter over one program
pub struct Interpreter<'p, 'r> {
    body: &'p [u8],
    index: usize,
    dialect: Dialect,
    timescale_ms: u32,
    regs: &'r mut Registers,
    halted: bool,
}

impl<'p, 'r> Interpreter<'p, 'r> {
    /// Start interpreting `program` (header marker optional)
    ///
    /// # Arguments
    /// * `program` - raw program bytes
    /// * `dialect` - opcode table
    /// * `timescale_ms` - initial milliseconds per wait unit
    /// * `regs` - registers shared with other programs of the same player
    pub fn new(program: &'p [u8], dialect: Dialect, timescale_ms: u32, regs: &'r mut Registers) -> Self {
        Self {
            body: program_body(program),
            index: 0,
            dialect,
            timescale_ms,
            regs,
            halted: false,
        }
    }

    /// Current milliseconds per wait unit
    pub fn timescale_ms(&self) -> u32 {
        self.timescale_ms
    }

    /// Decode the next record
    pub fn next_step(&mut self) -> Step {
        if self.halted || self.index >= self.body.len() {
            return self.halt(0, Halt::Finished);
        }
        let wait_ms = self.body[self.index] as u32 * self.timescale_ms;
        self.index += 2;
        if self.index > self.body.len() {
            // Trailing wait with no opcode
            return self.halt(wait_ms, Halt::Finished);
        }
        let byte = self.body[self.index - 1];
        let Some(opcode) = self.dialect.decode(byte) else {
            let reason = if byte == END_MARKER {
                Halt::EndMarker
            } else {
                Halt::UnknownOpcode(byte)
            };
            return self.halt(wait_ms, reason);
        };
        let start = self.index;
        let end = start + opcode.operand_len();
        if end > self.body.len() {
            return self.halt(wait_ms, Halt::Truncated);
        }
        self.index = end;

        match self.execute(opcode, start) {
            Ok(action) => Step {
                wait_ms,
                action: Ok(action),
            },
            Err(reason) => self.halt(wait_ms, reason),
        }
    }

    fn halt(&mut self, wait_ms: u32, reason: Halt) -> Step {
        self.halted = true;
        Step {
            wait_ms,
            action: Err(reason),
        }
    }

    fn execute(&mut self, opcode: Opcode, at: usize) -> Result<Action, Halt> {
        let op = &self.body[at..self.index];
        let action = match opcode {
            Opcode::Nop | Opcode::NopOperand => Action::Nop,
            Opcode::FrameDuration => {
                self.timescale_ms = 10 * op[0] as u32;
                Action::Nop
            }
            Opcode::SetLedColor => Action::SetLed(led(op[0])?, Rgb::new(op[1], op[2], op[3])),
            Opcode::SetLedsColor => Action::SetAll(Rgb::new(op[0], op[1], op[2])),
            Opcode::SetLedOff => Action::SetLed(led(op[0])?, Rgb::OFF),
            Opcode::SetLedPalette => {
                let color = self.regs.palette[(op[1] & 7) as usize];
                Action::SetLed(led(op[0])?, color)
            }
            Opcode::SetLedStreamingPalette => {
                let slot = self.regs.streaming_colors[(op[1] & 3) as usize % 3];
                let color = self.regs.palette[(slot & 7) as usize];
                Action::SetLed(led(op[0])?, color)
            }
            Opcode::SetMotor => Action::GoEar {
                ear: ear(op[0])?,
                position: op[1],
                dir: Direction::from_wire(op[2]),
            },
            Opcode::Avance => {
                let ear = ear(op[0])?;
                Action::MoveEar {
                    ear,
                    delta: op[1],
                    dir: self.regs.directions[ear.index()],
                }
            }
            Opcode::SetMotorDir => {
                let ear = ear(op[0])?;
                self.regs.directions[ear.index()] = Direction::from_wire(op[1]);
                Action::Nop
            }
            Opcode::RandMidi => Action::RandomMidi,
            Opcode::Attend => Action::AwaitIdle,
            Opcode::IfNe => {
                if self.regs.random != op[0] {
                    let rel = i16::from_be_bytes([op[1], op[2]]) as isize;
                    // Offset counts from the end of this record
                    let target = at as isize + rel + 3;
                    if target < 0 {
                        return Err(Halt::BadJump);
                    }
                    self.index = target as usize;
                }
                Action::Nop
            }
        };
        Ok(action)
    }
}

fn led(index: u8) -> Result<Led, Halt> {
    Led::from_index(index).ok_or(Halt::InvalidLed(index))
}

fn ear(index: u8) -> Result<EarId, Halt> {
    EarId::from_index(index).ok_or(Halt::InvalidEar(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choreography::palette::PALETTES;

    fn run(program: &[u8], dialect: Dialect, regs: &mut Registers) -> (Vec<Step>, Halt) {
        let mut vm = Interpreter::new(program, dialect, 0, regs);
        let mut steps = Vec::new();
        loop {
            let step = vm.next_step();
            match step.action {
                Ok(_) => steps.push(step),
                Err(halt) => {
                    steps.push(step);
                    return (steps, halt);
                }
            }
        }
    }

    #[test]
    fn test_led_and_timing() {
        let program = [
            1, 1, 1, 1, // header
            0, 1, 5, // frame_duration: 50 ms per unit
            2, 7, 3, 10, 20, 30, 0, 0, // left LED
            4, 10, 4, // nose off
        ];
        let mut regs = Registers::new(0);
        let (steps, halt) = run(&program, Dialect::Mtl, &mut regs);
        assert_eq!(halt, Halt::Finished);
        assert_eq!(steps[0].action, Ok(Action::Nop));
        assert_eq!(steps[1].wait_ms, 100);
        assert_eq!(steps[1].action, Ok(Action::SetLed(Led::Left, Rgb::new(10, 20, 30))));
        assert_eq!(steps[2].wait_ms, 200);
        assert_eq!(steps[2].action, Ok(Action::SetLed(Led::Nose, Rgb::OFF)));
    }

    #[test]
    fn test_trailing_wait_is_honored() {
        let program = [0, 1, 10, 3];
        let mut regs = Registers::new(0);
        let (steps, halt) = run(&program, Dialect::Mtl, &mut regs);
        assert_eq!(halt, Halt::Finished);
        assert_eq!(steps.last().map(|s| s.wait_ms), Some(300));
    }

    #[test]
    fn test_end_marker_and_unknown() {
        let mut regs = Registers::new(0);
        let (_, halt) = run(&[0, 255, 0, 0], Dialect::Mtl, &mut regs);
        assert_eq!(halt, Halt::EndMarker);
        let (steps, halt) = run(&[0, 0, 0, 3, 0, 0], Dialect::Mtl, &mut regs);
        assert_eq!(halt, Halt::UnknownOpcode(3));
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn test_truncated_operands() {
        let mut regs = Registers::new(0);
        let (_, halt) = run(&[0, 7, 1, 2], Dialect::Mtl, &mut regs);
        assert_eq!(halt, Halt::Truncated);
    }

    #[test]
    fn test_motor_opcodes() {
        let program = [
            0, 8, 1, 12, 1, // set_motor right -> 12 backward
            0, 20, 0, 1, // setmotordir left backward
            0, 17, 0, 3, // avance left by 3
            0, 19, // attend
        ];
        let mut regs = Registers::new(0);
        let (steps, _) = run(&program, Dialect::Mtl, &mut regs);
        assert_eq!(
            steps[0].action,
            Ok(Action::GoEar {
                ear: EarId::Right,
                position: 12,
                dir: Direction::Backward
            })
        );
        assert_eq!(
            steps[2].action,
            Ok(Action::MoveEar {
                ear: EarId::Left,
                delta: 3,
                dir: Direction::Backward
            })
        );
        assert_eq!(steps[3].action, Ok(Action::AwaitIdle));
        assert_eq!(regs.directions[0], Direction::Backward);
    }

    #[test]
    fn test_invalid_led_halts() {
        let mut regs = Registers::new(0);
        let (_, halt) = run(&[0, 10, 9], Dialect::Mtl, &mut regs);
        assert_eq!(halt, Halt::InvalidLed(9));
    }

    #[test]
    fn test_ifne_branches() {
        // ifne 5, skip the next record (5 bytes) when random != 5
        let program = [0, 18, 5, 0, 5, 0, 9, 255, 0, 0, 0, 10, 2];
        let mut taken = Registers::new(7);
        let (steps, _) = run(&program, Dialect::Mtl, &mut taken);
        assert_eq!(steps[1].action, Ok(Action::SetLed(Led::Center, Rgb::OFF)));

        let mut fallthrough = Registers::new(5);
        let (steps, _) = run(&program, Dialect::Mtl, &mut fallthrough);
        assert_eq!(steps[1].action, Ok(Action::SetAll(Rgb::new(255, 0, 0))));
    }

    #[test]
    fn test_palette_opcodes() {
        let mut regs = Registers::new(0);
        regs.palette = PALETTES[1];
        regs.streaming_colors = [2, 4, 6];
        let (steps, _) = run(&[0, 14, 1, 9], Dialect::Mtl, &mut regs);
        assert_eq!(steps[0].action, Ok(Action::SetLed(Led::Right, PALETTES[1][1])));
        let (steps, _) = run(&[0, 14, 4, 1], Dialect::Streaming, &mut regs);
        assert_eq!(steps[0].action, Ok(Action::SetLed(Led::Nose, PALETTES[1][4])));
    }

    #[test]
    fn test_streaming_ignores_frame_duration() {
        let mut regs = Registers::new(0);
        let mut vm = Interpreter::new(&[0, 1, 50, 2, 0], Dialect::Streaming, 170, &mut regs);
        assert_eq!(vm.next_step().action, Ok(Action::Nop));
        assert_eq!(vm.timescale_ms(), 170);
        assert_eq!(vm.next_step().wait_ms, 340);
    }
}
