use criterion::{black_box, criterion_group, criterion_main, Criterion};

use raspbridge::{ContextGetters, EngineGateway, Field, Plugin};

fn gateway() -> EngineGateway {
    let gateway = EngineGateway::new();
    gateway.initialize(Some(std::sync::Arc::new(|_line: &str| {}))).unwrap();
    gateway
        .create_snapshot(
            "const blocked = ['/etc/passwd', '/etc/shadow'];",
            vec![
                Plugin::new(
                    "const plugin = new RASP('cmd');\n\
                     plugin.register('command', params => {\n\
                       if (params.command.indexOf('cat') >= 0) return {action: 'block', message: 'cmd'};\n\
                     });",
                    "cmd.js",
                ),
                Plugin::new(
                    "const plugin = new RASP('file');\n\
                     plugin.register('readFile', (params, context) => {\n\
                       if (blocked.indexOf(params.realpath) >= 0) return {action: 'block', message: context.url};\n\
                     });",
                    "file.js",
                ),
            ],
        )
        .unwrap();
    gateway
}

fn bench_check_no_match(c: &mut Criterion) {
    let gateway = gateway();
    c.bench_function("check_no_match", |b| {
        b.iter(|| {
            black_box(
                gateway
                    .check("command", br#"{"command":"ls -l"}"#, ContextGetters::new(), 100)
                    .unwrap(),
            );
        });
    });
}

fn bench_check_block(c: &mut Criterion) {
    let gateway = gateway();
    c.bench_function("check_block", |b| {
        b.iter(|| {
            black_box(
                gateway
                    .check("command", br#"{"command":"cat /etc/passwd"}"#, ContextGetters::new(), 100)
                    .unwrap(),
            );
        });
    });
}

fn bench_check_with_context(c: &mut Criterion) {
    let gateway = gateway();
    c.bench_function("check_with_context", |b| {
        b.iter(|| {
            let getters = ContextGetters::new()
                .with(Field::Url, || "http://localhost/download?file=/etc/passwd")
                .with(Field::Method, || "get");
            black_box(
                gateway
                    .check("readFile", br#"{"realpath":"/etc/passwd"}"#, getters, 100)
                    .unwrap(),
            );
        });
    });
}

fn bench_exec_script(c: &mut Criterion) {
    let gateway = gateway();
    c.bench_function("exec_script", |b| {
        b.iter(|| {
            black_box(gateway.exec_script("(function(){return {rst:1+1}})()", "bench.js").unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_check_no_match,
    bench_check_block,
    bench_check_with_context,
    bench_exec_script
);
criterion_main!(benches);
