use rayon::ThreadPoolBuilder;
use tracing::debug;

pub fn configure_threads(spec: &str) {
    let count = if spec.eq_ignore_ascii_case("auto") {
        num_cpus::get()
    } else {
        spec.parse().unwrap_or_else(|_| num_cpus::get())
    };
    if let Err(err) = ThreadPoolBuilder::new().num_threads(count).build_global() {
        debug!("global thread pool already configured: {err}");
    }
}
