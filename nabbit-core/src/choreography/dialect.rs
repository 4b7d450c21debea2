//! Opcode tables
//!
//! Three historical tables share the record format but number their
//! opcodes differently.

/// Opcode table selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dialect {
    /// Compiled `.chor` programs
    #[default]
    Mtl,
    /// Older assembler programs
    Vasm,
    /// Programs driven by the streaming loop
    Streaming,
}

/// Decoded opcode, independent of numbering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
    Nop,
    /// `nop` with one ignored operand (streaming frame duration)
    NopOperand,
    FrameDuration,
    SetLedColor,
    SetMotor,
    SetLedsColor,
    SetLedOff,
    SetLedPalette,
    SetLedStreamingPalette,
    RandMidi,
    Avance,
    IfNe,
    Attend,
    SetMotorDir,
}

impl Dialect {
    /// Map an opcode byte to an operation
    ///
    /// `None` ends the program: the byte is either undefined in this table
    /// or names an operation that is not supported.
    pub fn decode(self, byte: u8) -> Option<Opcode> {
        use Opcode::*;
        match self {
            Dialect::Mtl => match byte {
                0 => Some(Nop),
                1 => Some(FrameDuration),
                7 => Some(SetLedColor),
                8 => Some(SetMotor),
                9 => Some(SetLedsColor),
                10 => Some(SetLedOff),
                14 => Some(SetLedPalette),
                16 => Some(RandMidi),
                17 => Some(Avance),
                18 => Some(IfNe),
                19 => Some(Attend),
                20 => Some(SetMotorDir),
                _ => None,
            },
            Dialect::Vasm => match byte {
                0 => Some(Nop),
                1 => Some(FrameDuration),
                7 => Some(SetLedColor),
                8 => Some(SetMotor),
                9 => Some(Avance),
                10 => Some(Attend),
                14 => Some(IfNe),
                // 2-6 midi/sound/echo, 11 end, 12 wait_music, 13 set, 15 rand
                _ => None,
            },
            Dialect::Streaming => match byte {
                0 => Some(Nop),
                1 => Some(NopOperand),
                7 => Some(SetLedColor),
                10 => Some(SetLedOff),
                14 => Some(SetLedStreamingPalette),
                _ => None,
            },
        }
    }
}

impl Opcode {
    /// Number of operand bytes following the opcode
    pub fn operand_len(self) -> usize {
        use Opcode::*;
        match self {
            Nop | RandMidi | Attend => 0,
            NopOperand | FrameDuration | SetLedOff => 1,
            SetLedPalette | SetLedStreamingPalette | Avance | SetMotorDir => 2,
            SetMotor | SetLedsColor | IfNe => 3,
            SetLedColor => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_differ() {
        assert_eq!(Dialect::Mtl.decode(9), Some(Opcode::SetLedsColor));
        assert_eq!(Dialect::Vasm.decode(9), Some(Opcode::Avance));
        assert_eq!(Dialect::Streaming.decode(9), None);
        assert_eq!(Dialect::Streaming.decode(1), Some(Opcode::NopOperand));
        assert_eq!(Dialect::Mtl.decode(14), Some(Opcode::SetLedPalette));
        assert_eq!(Dialect::Vasm.decode(14), Some(Opcode::IfNe));
    }

    #[test]
    fn test_unsupported_terminate() {
        for byte in [2, 3, 4, 5, 6, 11, 12, 13, 15, 255] {
            assert_eq!(Dialect::Vasm.decode(byte), None);
        }
        for byte in [2, 6, 11, 15, 21, 255] {
            assert_eq!(Dialect::Mtl.decode(byte), None);
        }
    }
}
