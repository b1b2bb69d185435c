use gdbridge::prelude::*;

fn main() {
    let bound;
    {
        let owner = Owned::<Object>::construct();
        bound = owner.bind();
    }
    let _ = bound.raw();
}
