use std::sync::Arc;

use crate::{
    analysis::{CfgBuilder, MethodCfg},
    assembly::{Instruction, Opcode, Operand},
    metadata::{ElementType, MemberRef, MemberRefRc, MethodBody, MethodSig, Token},
};

pub const TEST_METHOD: Token = Token(0x0600_0001);

// Helper function to create a static method reference
pub fn create_method_ref(row: u32, name: &str, params: Vec<ElementType>, ret: ElementType) -> MemberRefRc {
    Arc::new(MemberRef::method(
        Token::from_parts(Token::MEMBER_REF, row),
        "Obfuscated.Helpers",
        name,
        MethodSig::new(params, ret),
    ))
}

// Helper function to create a string decrypter taking one string
pub fn create_string_decrypter() -> MemberRefRc {
    create_method_ref(1, "Decrypt", vec![ElementType::String], ElementType::String)
}

// Helper function to create an `int Add(int, int)` oracle
pub fn create_int_oracle() -> MemberRefRc {
    create_method_ref(2, "Add", vec![ElementType::I4, ElementType::I4], ElementType::I4)
}

// Helper function to create `System.String::Intern`
pub fn create_intern() -> MemberRefRc {
    Arc::new(MemberRef::method(
        Token::from_parts(Token::MEMBER_REF, 0x40),
        "System.String",
        "Intern",
        MethodSig::new(vec![ElementType::String], ElementType::String),
    ))
}

// Helper function to create `castclass System.String`
pub fn create_castclass_string() -> Instruction {
    Instruction::new(
        Opcode::Castclass,
        Operand::Member(Arc::new(MemberRef::type_ref(
            Token::from_parts(Token::TYPE_REF, 0x10),
            "System",
            "String",
        ))),
    )
}

// Helper function to create a method body with the default test token
pub fn create_body(instructions: Vec<Instruction>) -> MethodBody {
    MethodBody::new(TEST_METHOD, instructions)
}

// Helper function to build a graph from a flat instruction list
pub fn create_cfg(instructions: Vec<Instruction>) -> MethodCfg {
    CfgBuilder::build(&create_body(instructions)).unwrap()
}
