mod fixtures;

use fixtures::{logger_and_service, Logger, Service};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Step {
    ResolveService,
    ResolveLogger,
    Release(usize),
    ReleaseLogger,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::ResolveService),
        1 => Just(Step::ResolveLogger),
        3 => any::<usize>().prop_map(Step::Release),
        1 => Just(Step::ReleaseLogger),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn release_sequences_keep_ledger_consistent(steps in prop::collection::vec(step(), 1..40)) {
        let (kernel, logger, service) = logger_and_service().expect("kernel builds");
        let mut issued: Vec<(Arc<Service>, bool)> = Vec::new();
        let mut loggers: Vec<Arc<dyn Logger>> = Vec::new();

        for step in steps {
            match step {
                Step::ResolveService => {
                    issued.push((kernel.resolve::<Service>().expect("service resolves"), false));
                }
                Step::ResolveLogger => {
                    loggers.push(kernel.resolve::<dyn Logger>().expect("logger resolves"));
                }
                Step::Release(index) if !issued.is_empty() => {
                    let len = issued.len();
                    let (instance, released) = &mut issued[index % len];
                    let tracked = kernel.release(&*instance);
                    prop_assert_eq!(tracked, !*released);
                    *released = true;
                }
                Step::Release(_) => {}
                Step::ReleaseLogger => {
                    if let Some(instance) = loggers.last() {
                        prop_assert!(kernel.release(instance));
                    }
                }
            }

            let released = issued.iter().filter(|(_, released)| *released).count();
            prop_assert_eq!(logger.destroyed(), 0);
            prop_assert_eq!(service.destroyed(), released);
            prop_assert_eq!(service.created(), issued.len());
        }

        // Все выданные Logger указывают на один singleton
        prop_assert!(loggers.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        let all_share_logger = issued.iter().all(|(instance, _)| {
            loggers.first().map_or(true, |logger| Arc::ptr_eq(logger, &instance.logger))
        });
        prop_assert!(all_share_logger);

        kernel.dispose();
        prop_assert_eq!(logger.destroyed(), logger.created());
        prop_assert!(logger.created() <= 1);
        prop_assert_eq!(service.destroyed(), service.created());
    }
}
