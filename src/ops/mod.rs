pub mod ai;
pub mod canvas_ops;
pub mod inpaint;
pub mod shapes;
pub mod text;
