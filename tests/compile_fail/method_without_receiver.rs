use gdbridge::host_methods;

struct Beacon;

#[host_methods]
impl Beacon {
    #[method]
    fn pulse() -> i64 {
        1
    }
}

fn main() {
    let _ = Beacon;
}
