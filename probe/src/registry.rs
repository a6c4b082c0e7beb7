//! Worker registry. Workers are registered through plain factory functions
//! and executed in ascending priority; a worker-level scan error annotates
//! its finding and the scan continues, anything else aborts.

use crate::error::Error;

pub trait Worker<C> {
    fn name(&self) -> &'static str;
    fn descr(&self) -> &'static str;
    /// Lower runs earlier.
    fn prio(&self) -> usize;
    fn run(&mut self, ctx: &mut C) -> Result<(), Error>;
}

pub type WorkerFactory<C> = fn() -> Box<dyn Worker<C>>;

pub struct WorkerRegistry<C> {
    workers: Vec<Box<dyn Worker<C>>>,
}

impl<C> WorkerRegistry<C> {
    pub fn new(factories: &[WorkerFactory<C>]) -> Self {
        let mut workers: Vec<Box<dyn Worker<C>>> =
            factories.iter().map(|factory| factory()).collect();
        workers.sort_by_key(|worker| worker.prio());
        WorkerRegistry { workers }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.workers.iter().map(|worker| worker.name()).collect()
    }

    pub fn run(&mut self, ctx: &mut C) -> Result<(), Error> {
        for worker in &mut self.workers {
            log::info!("running worker \"{}\": {}", worker.name(), worker.descr());
            match worker.run(ctx) {
                Ok(()) => {}
                Err(Error::Scan(msg)) => {
                    log::info!("scan error in \"{}\": {}", worker.name(), msg);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ctx {
        order: Vec<&'static str>,
    }

    struct First;
    struct Second;
    struct Failing;

    impl Worker<Ctx> for First {
        fn name(&self) -> &'static str {
            "first"
        }
        fn descr(&self) -> &'static str {
            "runs first"
        }
        fn prio(&self) -> usize {
            0
        }
        fn run(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
            ctx.order.push(self.name());
            Ok(())
        }
    }

    impl Worker<Ctx> for Second {
        fn name(&self) -> &'static str {
            "second"
        }
        fn descr(&self) -> &'static str {
            "runs second"
        }
        fn prio(&self) -> usize {
            10
        }
        fn run(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
            ctx.order.push(self.name());
            Ok(())
        }
    }

    impl Worker<Ctx> for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn descr(&self) -> &'static str {
            "fails with a scan error"
        }
        fn prio(&self) -> usize {
            5
        }
        fn run(&mut self, ctx: &mut Ctx) -> Result<(), Error> {
            ctx.order.push(self.name());
            Err(Error::Scan("nothing to see".to_string()))
        }
    }

    const FACTORIES: &[WorkerFactory<Ctx>] = &[
        || Box::new(Second),
        || Box::new(Failing),
        || Box::new(First),
    ];

    #[test]
    fn runs_in_priority_order_and_survives_scan_errors() {
        let mut registry = WorkerRegistry::new(FACTORIES);
        assert_eq!(registry.names(), vec!["first", "failing", "second"]);

        let mut ctx = Ctx { order: Vec::new() };
        registry.run(&mut ctx).unwrap();
        assert_eq!(ctx.order, vec!["first", "failing", "second"]);
    }

    struct Replayer;

    impl Worker<Ctx> for Replayer {
        fn name(&self) -> &'static str {
            "replayer"
        }
        fn descr(&self) -> &'static str {
            "fails with a replay mismatch"
        }
        fn prio(&self) -> usize {
            0
        }
        fn run(&mut self, _ctx: &mut Ctx) -> Result<(), Error> {
            Err(Error::Replay("boom".to_string()))
        }
    }

    #[test]
    fn replay_mismatch_aborts_the_scan() {
        let factories: &[WorkerFactory<Ctx>] = &[|| Box::new(Replayer), || Box::new(Second)];
        let mut registry = WorkerRegistry::new(factories);
        let mut ctx = Ctx { order: Vec::new() };
        assert!(matches!(registry.run(&mut ctx), Err(Error::Replay(_))));
        assert!(ctx.order.is_empty());
    }
}
