use gdbridge::host_methods;

struct Beacon;

#[host_methods]
impl Beacon {
    #[signal]
    fn pinged(total: i64) {}
}

fn main() {
    let _ = Beacon;
}
