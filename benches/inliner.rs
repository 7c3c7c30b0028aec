//! Benchmarks for graph construction and call-result inlining.
//!
//! - Building a graph from a flat body and flattening it back
//! - Full engine runs over many methods with a static evaluator

extern crate cflowkit;

use cflowkit::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::{hint::black_box, sync::Arc};

fn add_oracle() -> MemberRefRc {
    Arc::new(MemberRef::method(
        Token::from_parts(Token::MEMBER_REF, 1),
        "Obfuscated.Constants",
        "Add",
        MethodSig::new(vec![ElementType::I4, ElementType::I4], ElementType::I4),
    ))
}

/// A method with `count` oracle calls, each behind a two-way branch.
fn branchy_body(token: Token, count: usize) -> MethodBody {
    let oracle = add_oracle();
    let mut instrs = Vec::new();
    for i in 0..count {
        let skip = instrs.len() + 6;
        instrs.push(Instruction::ldarg(0));
        instrs.push(Instruction::branch(Opcode::Brfalse, skip));
        instrs.push(Instruction::ldc_i4(i as i32));
        instrs.push(Instruction::ldc_i4(1));
        instrs.push(Instruction::call(Arc::clone(&oracle)));
        instrs.push(Instruction::simple(Opcode::Pop));
    }
    instrs.push(Instruction::simple(Opcode::Ret));
    MethodBody::new(token, instrs)
}

fn engine() -> DeobfuscationEngine {
    let oracle = add_oracle();
    let evaluator = StaticEvaluator::new();
    evaluator.register_handler(oracle.token, |args| match args {
        [Value::Known(Literal::I4(a)), Value::Known(Literal::I4(b))] => {
            EvalResult::Ok(Literal::I4(a.wrapping_add(*b)))
        }
        _ => EvalResult::Unresolved,
    });
    let engine = DeobfuscationEngine::new(EngineConfig::default(), Arc::new(evaluator));
    engine.register_oracle(oracle.token);
    engine
}

fn bench_build_and_flatten(c: &mut Criterion) {
    let body = branchy_body(Token::from_parts(Token::METHOD_DEF, 1), 256);

    let mut group = c.benchmark_group("cfg");
    group.throughput(Throughput::Elements(body.len() as u64));
    group.bench_function("build", |b| {
        b.iter(|| black_box(CfgBuilder::build(black_box(&body)).unwrap()));
    });

    let cfg = CfgBuilder::build(&body).unwrap();
    group.bench_function("generate", |b| {
        b.iter(|| black_box(CfgCodeGenerator::generate(black_box(&cfg)).unwrap()));
    });
    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let bodies: Vec<MethodBody> = (1..=128)
        .map(|row| branchy_body(Token::from_parts(Token::METHOD_DEF, row), 32))
        .collect();

    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Elements(bodies.len() as u64));
    group.bench_function("process_128_methods", |b| {
        b.iter(|| {
            // Fresh engine each time so the result cache starts cold.
            let engine = engine();
            black_box(engine.process(black_box(bodies.clone())).unwrap())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_build_and_flatten, bench_engine);
criterion_main!(benches);
