#![allow(dead_code)]

use percolator::program::{
    Instruction, Method, MethodAccessFlags, MethodBody, ProgramCounter,
};

/// Builds a method body with instructions at consecutive program counters.
pub fn body(parameter_count: u16, instructions: Vec<Instruction>) -> MethodBody {
    MethodBody {
        max_locals: 8,
        parameter_count,
        instructions: instructions
            .into_iter()
            .enumerate()
            .map(|(pc, insn)| (ProgramCounter::from(pc as u16), insn))
            .collect(),
    }
}

pub fn static_method(body: MethodBody) -> Method {
    Method {
        access_flags: MethodAccessFlags::STATIC,
        body: Some(body),
    }
}

pub fn native_method() -> Method {
    Method {
        access_flags: MethodAccessFlags::STATIC | MethodAccessFlags::NATIVE,
        body: None,
    }
}
