mod cucumber;
mod support;

use ::cucumber::{codegen::LocalBoxFuture, event::ScenarioFinished, gherkin, writer, World};
use futures_util::FutureExt;
use log::*;
use tokio::runtime::Runtime;
use zvr_order_engine::OrderEngineDatabase;

use crate::cucumber::OrderWorld;

fn main() {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let sys = Runtime::new().expect("Could not start the test runtime");
    sys.block_on(
        OrderWorld::cucumber()
            .with_writer(writer::Libtest::or_basic())
            .after(|_f, _r, scenario, ev, w| post_test_hook(scenario, ev, w))
            .run("tests/features"),
    );
    info!("🚀️ Tests complete");
}

fn post_test_hook<'a>(
    scenario: &'a gherkin::Scenario,
    ev: &'a ScenarioFinished,
    world: Option<&'a mut OrderWorld>,
) -> LocalBoxFuture<'a, ()> {
    let fut = async move {
        trace!("🚀️ After-scenario hook running for \"{}\"", scenario.name);
        match world.and_then(|w| w.shop.take()) {
            Some(shop) => match ev {
                ScenarioFinished::StepPassed => {
                    debug!("🚀️ Scenario complete, removing database: {}", shop.db.url());
                    shop.tear_down().await;
                },
                ScenarioFinished::StepFailed(_, _, _) | ScenarioFinished::StepSkipped => {
                    error!("🚀️ Error in scenario, database retained: {}", shop.db.url());
                },
                _ => trace!("🚀️ Unhandled event: {ev:?}"),
            },
            None => warn!("🚀️ No shop was set up. Nothing to clean up."),
        }
        trace!("🚀️ After-scenario hook complete");
    };
    fut.boxed_local()
}
