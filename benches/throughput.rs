//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use meternode_core::core::master::{MasterConfig, MetricKind, ModbusMaster};
use meternode_core::core::protocol::checksum::crc16;
use meternode_core::core::protocol::float::f32_to_registers;
use meternode_core::core::protocol::modbus::{build_read_request, build_read_response, parse_read_response, verify_response_crc};
use meternode_core::core::transport::{FaultConfig, MeterValues, SimulatedMeter};

fn crc_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = (0..256).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("crc16");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("256_bytes", |b| b.iter(|| black_box(crc16(black_box(&data)))));

    group.bench_function("request_header", |b| {
        let header = [0x01, 0x03, 0x00, 0x06, 0x00, 0x02];
        b.iter(|| black_box(crc16(black_box(&header))))
    });

    group.finish();
}

fn frame_benchmark(c: &mut Criterion) {
    let (high, low) = f32_to_registers(230.5);
    let response = build_read_response(1, high, low);

    let mut group = c.benchmark_group("frame");

    group.bench_function("build_read_request", |b| {
        b.iter(|| black_box(build_read_request(black_box(1), black_box(0x0006))))
    });

    group.bench_function("parse_and_verify_response", |b| {
        b.iter(|| {
            let registers = parse_read_response(black_box(&response), 1).unwrap();
            verify_response_crc(black_box(&response)).unwrap();
            black_box(registers)
        })
    });

    group.finish();
}

fn exchange_benchmark(c: &mut Criterion) {
    let meter = SimulatedMeter::new(1, MeterValues::default()).with_faults(FaultConfig {
        realtime: false,
        ..FaultConfig::default()
    });
    let mut master = ModbusMaster::new(meter, MasterConfig::default());

    c.bench_function("simulated_exchange", |b| {
        b.iter(|| black_box(master.read_float_register(black_box(MetricKind::Temperature))))
    });
}

criterion_group!(benches, crc_benchmark, frame_benchmark, exchange_benchmark);
criterion_main!(benches);
