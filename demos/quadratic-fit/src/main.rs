// Example: fit y = a·x² + b·x + c with the compute graph
//
// Builds the whole training computation once — forward loss and backward
// gradients in a single plan — then drives ten gradient-descent steps by
// re-running compute() with fresh data in the parameter buffers.
//
// The loop is:
//   1. reset_grads()   — zero the accumulators
//   2. seed the loss gradient with 1
//   3. compute()       — values and gradients in one sweep
//   4. sgd_step()      — p ← p − lr·p.grad
//
// Pass --dot to dump the extended plan as GraphViz.

use vole::prelude::*;

fn main() -> vole::Result<()> {
    tracing_subscriber::fmt::init();

    let n = 20usize;

    // Data: x over [0, 20), y = x + 5 — so the exact fit is a=0, b·xₙ
    // recovering the slope, c the intercept.
    let x = Tensor::<f32>::init_arange(&[n], 0.0, 20.0)?.with_name("x");
    let y = Tensor::<f32>::init_arange(&[n], 5.0, 25.0)?.with_name("y");

    // Trainable parameters. Marking them before building ops is what makes
    // gradient tracking flow into the expression.
    let a = Tensor::<f32>::init_scalar(0.01)?.with_name("a");
    let b = Tensor::<f32>::init_scalar(0.01)?.with_name("b");
    let c = Tensor::<f32>::init_scalar(0.01)?.with_name("c");
    a.set_param();
    b.set_param();
    c.set_param();

    // Normalised abscissa keeps the quadratic well-conditioned at lr 0.01.
    let x_scale = Tensor::<f32>::init_scalar(1.0 / n as f32)?.with_name("x_scale");
    let xn = x.mul(&x_scale)?;
    let xn2 = xn.sqr();

    let y_hat = a
        .mul(&xn2)?
        .add(&b.mul(&xn)?)?
        .add(&c)?
        .with_name("y_hat");
    let err = y_hat.sub(&y)?;

    // Mean squared error, written as sum·(1/n) so every gradient stays on
    // the implemented adjoint rules.
    let inv_n = Tensor::<f32>::init_scalar(1.0 / n as f32)?;
    let loss = err.sqr().sum().mul(&inv_n)?.with_name("loss");

    let mut graph = Graph::new();
    graph.build_forward(&loss);
    graph.build_backward(false)?;

    if std::env::args().any(|arg| arg == "--dot") {
        std::fs::write("quadratic.dot", graph.to_dot()).map_err(|e| Error::msg(e.to_string()))?;
        println!("wrote quadratic.dot");
    }

    let seed = loss
        .grad()
        .ok_or_else(|| Error::msg("loss has no gradient"))?;

    let lr = 0.01f32;
    for step in 0..10 {
        graph.reset_grads();
        seed.set_all(1.0);
        graph.compute()?;
        println!("step {:2}: loss = {:.6}", step, loss.to_scalar()?);
        sgd_step(&[&a, &b, &c], lr)?;
    }

    println!(
        "fit: a = {:.4}, b = {:.4}, c = {:.4}",
        a.to_scalar()?,
        b.to_scalar()?,
        c.to_scalar()?
    );
    Ok(())
}
